use std::path::{Component, Path, PathBuf};

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

/// Static asset serving with SPA fallback: a miss on any non-API GET returns
/// `index.html` so client-side routing keeps working.
pub async fn serve(static_dir: &Path, request_path: &str) -> Response {
    let Some(relative) = sanitize(request_path) else {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    };

    let candidate = static_dir.join(&relative);
    if let Some(response) = serve_file(&candidate).await {
        return response;
    }

    match serve_file(&static_dir.join("index.html")).await {
        Some(response) => response,
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

async fn serve_file(path: &Path) -> Option<Response> {
    if !tokio::fs::metadata(path).await.ok()?.is_file() {
        return None;
    }
    let contents = tokio::fs::read(path).await.ok()?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    Some(
        (
            [(header::CONTENT_TYPE, mime.to_string())],
            contents,
        )
            .into_response(),
    )
}

/// Rejects traversal; resolves "/" to the SPA index.
fn sanitize(request_path: &str) -> Option<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Some(PathBuf::from("index.html"));
    }
    let path = Path::new(trimmed);
    if path
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        Some(path.to_path_buf())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_resolves_to_index() {
        assert_eq!(sanitize("/"), Some(PathBuf::from("index.html")));
    }

    #[test]
    fn traversal_is_rejected() {
        assert_eq!(sanitize("/../etc/passwd"), None);
        assert_eq!(sanitize("/a/../../b"), None);
        assert!(sanitize("/assets/app.js").is_some());
    }

    #[tokio::test]
    async fn missing_asset_falls_back_to_index() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("index.html"), "<html>app</html>")
            .await
            .unwrap();

        let response = serve(dir.path(), "/some/client/route").await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/html"));
    }

    #[tokio::test]
    async fn empty_dir_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let response = serve(dir.path(), "/whatever").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
