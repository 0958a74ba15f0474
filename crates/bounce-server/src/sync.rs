//! File-backed data-sync store and its HTTP API.
//!
//! Sessions live as one JSON file each under `storage/sessions/`; groups,
//! settings, and scenarios are singleton files. Every successful push or
//! delete is fanned out to the registry's subscriber sockets.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::UNIX_EPOCH,
};

use axum::{
    Json,
    extract::{Query, State},
};
use bounce_messages::SyncNotification;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::state::AppState;

pub struct SyncStore {
    storage_dir: PathBuf,
    sessions_dir: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct Stamp {
    #[serde(rename = "updatedAt")]
    pub updated_at: f64,
}

#[derive(Debug, Serialize)]
pub struct SyncMetadata {
    pub sessions: BTreeMap<String, f64>,
    pub groups: Stamp,
    pub settings: Stamp,
    pub scenarios: Stamp,
}

impl SyncStore {
    pub fn new(storage_dir: &Path) -> Self {
        Self {
            storage_dir: storage_dir.to_path_buf(),
            sessions_dir: storage_dir.join("sessions"),
        }
    }

    pub async fn init(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.sessions_dir).await?;
        tracing::info!("💾 sync storage ready at {}", self.storage_dir.display());
        Ok(())
    }

    fn item_path(&self, kind: &str, id: Option<&str>) -> Option<PathBuf> {
        if kind == "session" {
            Some(self.sessions_dir.join(format!("{}.json", id?)))
        } else {
            Some(self.storage_dir.join(format!("{kind}.json")))
        }
    }

    pub async fn get_item(&self, kind: &str, id: Option<&str>) -> Value {
        match self.item_path(kind, id) {
            Some(path) => read_json(&path).await.unwrap_or(Value::Null),
            None => Value::Null,
        }
    }

    pub async fn get_sessions(&self) -> Vec<Value> {
        let mut sessions = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.sessions_dir).await else {
            return sessions;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(value) = read_json(&path).await {
                    sessions.push(value);
                }
            }
        }
        sessions
    }

    pub async fn save_item(&self, kind: &str, data: &Value) -> std::io::Result<()> {
        let id = data.get("id").and_then(Value::as_str);
        let path = self
            .item_path(kind, id)
            .ok_or_else(|| std::io::Error::other(format!("{kind} item is missing an id")))?;
        let pretty = serde_json::to_string_pretty(data)?;
        tokio::fs::write(path, pretty).await
    }

    /// Only sessions are individually deletable; other kinds are a no-op that
    /// still reports success. `Ok(true)` means a file was actually removed.
    pub async fn delete_item(&self, kind: &str, id: &str) -> std::io::Result<bool> {
        if kind != "session" {
            return Ok(false);
        }
        let path = self.sessions_dir.join(format!("{id}.json"));
        tokio::fs::remove_file(path).await?;
        Ok(true)
    }

    pub async fn metadata(&self) -> SyncMetadata {
        let mut sessions = BTreeMap::new();
        if let Ok(mut entries) = tokio::fs::read_dir(&self.sessions_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if !path.extension().is_some_and(|ext| ext == "json") {
                    continue;
                }
                if let Some(value) = read_json(&path).await {
                    if let Some(id) = value.get("id").and_then(Value::as_str) {
                        sessions.insert(id.to_string(), item_stamp(&value));
                    }
                }
            }
        }
        SyncMetadata {
            sessions,
            groups: self.singleton_stamp("groups").await,
            settings: self.singleton_stamp("settings").await,
            scenarios: self.singleton_stamp("scenarios").await,
        }
    }

    /// The newer of the payload's own timestamp (max over array items) and
    /// the file's mtime, so external edits are noticed too.
    async fn singleton_stamp(&self, name: &str) -> Stamp {
        let path = self.storage_dir.join(format!("{name}.json"));
        let internal = match read_json(&path).await {
            Some(Value::Array(items)) => items.iter().map(item_stamp).fold(0.0, f64::max),
            Some(value) => value.get("updatedAt").and_then(Value::as_f64).unwrap_or(0.0),
            None => return Stamp { updated_at: 0.0 },
        };
        Stamp {
            updated_at: internal.max(mtime_ms(&path).await),
        }
    }
}

async fn read_json(path: &Path) -> Option<Value> {
    let contents = tokio::fs::read(path).await.ok()?;
    serde_json::from_slice(&contents).ok()
}

fn item_stamp(value: &Value) -> f64 {
    value
        .get("updatedAt")
        .and_then(Value::as_f64)
        .or_else(|| value.get("timestamp").and_then(Value::as_f64))
        .unwrap_or(0.0)
}

async fn mtime_ms(path: &Path) -> f64 {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return 0.0;
    };
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

#[derive(Debug, Deserialize)]
pub struct ItemQuery {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PushRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

pub async fn metadata_handler(State(state): State<Arc<AppState>>) -> Json<SyncMetadata> {
    Json(state.sync.metadata().await)
}

pub async fn pull_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ItemQuery>,
) -> Json<Value> {
    Json(state.sync.get_item(&query.kind, query.id.as_deref()).await)
}

pub async fn pull_all_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "sessions": state.sync.get_sessions().await,
        "groups": state.sync.get_item("groups", None).await,
        "settings": state.sync.get_item("settings", None).await,
        "scenarios": state.sync.get_item("scenarios", None).await,
    }))
}

pub async fn push_handler(
    State(state): State<Arc<AppState>>,
    Json(push): Json<PushRequest>,
) -> Json<Value> {
    match state.sync.save_item(&push.kind, &push.data).await {
        Ok(()) => {
            state
                .registry
                .broadcast(&SyncNotification::Updated {
                    data_type: push.kind,
                    item_id: push
                        .data
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    updated_at: push.data.get("updatedAt").and_then(Value::as_f64),
                })
                .await;
            Json(json!({ "success": true }))
        }
        Err(err) => {
            tracing::error!("failed to save sync item ({}): {err}", err.kind());
            Json(json!({ "success": false }))
        }
    }
}

pub async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ItemQuery>,
) -> Json<Value> {
    let id = query.id.unwrap_or_default();
    match state.sync.delete_item(&query.kind, &id).await {
        Ok(deleted) => {
            if deleted {
                state
                    .registry
                    .broadcast(&SyncNotification::Deleted {
                        data_type: query.kind,
                        item_id: id,
                    })
                    .await;
            }
            Json(json!({ "success": true }))
        }
        Err(err) => {
            tracing::error!("failed to delete sync item: {err}");
            Json(json!({ "success": false }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sessions_round_trip_through_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SyncStore::new(dir.path());
        store.init().await.unwrap();

        let session = json!({ "id": "s1", "title": "hello", "updatedAt": 42.0 });
        store.save_item("session", &session).await.unwrap();

        let loaded = store.get_item("session", Some("s1")).await;
        assert_eq!(loaded["title"], "hello");
        assert_eq!(store.get_sessions().await.len(), 1);

        assert!(store.delete_item("session", "s1").await.unwrap());
        assert_eq!(store.get_item("session", Some("s1")).await, Value::Null);
    }

    #[tokio::test]
    async fn session_save_requires_an_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = SyncStore::new(dir.path());
        store.init().await.unwrap();

        let result = store.save_item("session", &json!({ "title": "no id" })).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn metadata_falls_back_from_updated_at_to_timestamp_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = SyncStore::new(dir.path());
        store.init().await.unwrap();

        store
            .save_item("session", &json!({ "id": "a", "updatedAt": 10.0 }))
            .await
            .unwrap();
        store
            .save_item("session", &json!({ "id": "b", "timestamp": 7.0 }))
            .await
            .unwrap();
        store
            .save_item("session", &json!({ "id": "c" }))
            .await
            .unwrap();

        let metadata = store.metadata().await;
        assert_eq!(metadata.sessions["a"], 10.0);
        assert_eq!(metadata.sessions["b"], 7.0);
        assert_eq!(metadata.sessions["c"], 0.0);
    }

    #[tokio::test]
    async fn singleton_stamp_prefers_the_newest_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = SyncStore::new(dir.path());
        store.init().await.unwrap();

        // mtime is "now" in ms, far larger than the internal stamp.
        store
            .save_item("settings", &json!({ "updatedAt": 5.0 }))
            .await
            .unwrap();
        let metadata = store.metadata().await;
        assert!(metadata.settings.updated_at > 5.0);

        // Absent file reports zero.
        assert_eq!(metadata.scenarios.updated_at, 0.0);
    }

    #[tokio::test]
    async fn non_session_delete_is_a_successful_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = SyncStore::new(dir.path());
        store.init().await.unwrap();

        assert!(!store.delete_item("settings", "ignored").await.unwrap());
    }
}
