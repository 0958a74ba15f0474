//! Target URL resolution and the override-host round trip.
//!
//! The relay never lets the executor dial an arbitrary absolute host straight
//! from client input: absolute URLs are narrowed to path + query, and only
//! the dedicated override query parameter (planted by this module's own
//! response-header rewrite) can move a request off the default target
//! domain.

use bounce_messages::{JobDescription, OVERRIDE_HOST_PARAM};
use url::Url;

pub struct ResolvedTarget {
    pub url: String,
    pub host: String,
}

pub fn resolve_target(job: &JobDescription, default_domain: &str) -> ResolvedTarget {
    let mut path_and_query = job
        .url
        .clone()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| {
            let query = encode_pairs(job.query_params.iter());
            if query.is_empty() {
                job.path.clone()
            } else {
                format!("{}?{}", job.path, query)
            }
        });

    if path_and_query.starts_with("http://") || path_and_query.starts_with("https://") {
        if let Ok(parsed) = Url::parse(&path_and_query) {
            let query = parsed.query().map(|q| format!("?{q}")).unwrap_or_default();
            tracing::debug!("narrowing absolute url {path_and_query}");
            path_and_query = format!("{}{}", parsed.path(), query);
        }
    }

    let mut target_host = default_domain.to_string();
    if let Some((stripped, host)) = extract_override_host(&path_and_query) {
        tracing::info!("🔀 switching target host to {host}");
        target_host = host;
        path_and_query = stripped;
    }

    let clean_path = path_and_query.trim_start_matches('/');
    let clean_path = fixup_upload_path(clean_path, &job.method, default_domain);

    ResolvedTarget {
        url: format!("https://{target_host}/{clean_path}"),
        host: target_host,
    }
}

/// Pulls the override-host parameter out of a path + query string, returning
/// the cleaned path + query and the named host.
fn extract_override_host(path_and_query: &str) -> Option<(String, String)> {
    if !path_and_query.contains(OVERRIDE_HOST_PARAM) {
        return None;
    }
    let base = Url::parse("http://relay.invalid").ok()?;
    let parsed = base.join(path_and_query).ok()?;

    let mut host = None;
    let remaining: Vec<(String, String)> = parsed
        .query_pairs()
        .filter_map(|(key, value)| {
            if key == OVERRIDE_HOST_PARAM {
                host = Some(value.into_owned());
                None
            } else {
                Some((key.into_owned(), value.into_owned()))
            }
        })
        .collect();
    let host = host?;

    let query = encode_pairs(remaining.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    let stripped = if query.is_empty() {
        parsed.path().to_string()
    } else {
        format!("{}?{}", parsed.path(), query)
    };
    Some((stripped, host))
}

/// The upstream upload endpoint has an asymmetric path shape between
/// initiation and continuation; both normalization directions live here.
/// POST to a bare `v1*/files` resource gains the `upload/` prefix; a path
/// that already contains the canonical `upload/v1*/files` suffix but carries
/// extra leading segments is trimmed down to it.
fn fixup_upload_path(clean_path: &str, method: &str, default_domain: &str) -> String {
    if !default_domain.contains("generativelanguage") {
        return clean_path.to_string();
    }

    if contains_upload_files(clean_path) {
        if let Some(index) = clean_path.find("upload/") {
            if index > 0 {
                let fixed = &clean_path[index..];
                tracing::info!("✂️ trimming upload path: {clean_path} -> {fixed}");
                return fixed.to_string();
            }
        }
        return clean_path.to_string();
    }

    if method.eq_ignore_ascii_case("POST") && version_files_at(clean_path) {
        tracing::info!("➕ completing upload path: upload/{clean_path}");
        return format!("upload/{clean_path}");
    }

    clean_path.to_string()
}

/// Does the path contain `upload/` immediately followed by a `v1*/files`
/// version segment anywhere?
fn contains_upload_files(path: &str) -> bool {
    let mut start = 0;
    while let Some(found) = path[start..].find("upload/") {
        let index = start + found;
        if version_files_at(&path[index + "upload/".len()..]) {
            return true;
        }
        start = index + 1;
    }
    false
}

/// Matches a `v1[a-z0-9]*/files` prefix, e.g. `v1beta/files` or `v1/files`.
fn version_files_at(s: &str) -> bool {
    let Some(rest) = s.strip_prefix("v1") else {
        return false;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit());
    rest.starts_with("/files")
}

/// Send-side half of the override-host round trip: a redirect or
/// upload-continuation URL pointing at the upstream is rewritten to target
/// the relay, with the true host smuggled along as a query parameter.
pub fn rewrite_upstream_header(value: &str, relay_host: &str, target_host: &str) -> String {
    let Ok(parsed) = Url::parse(value) else {
        return value.to_string();
    };
    let Some(host) = host_with_port(&parsed) else {
        return value.to_string();
    };
    if host != target_host && !host.ends_with("googleapis.com") {
        return value.to_string();
    }

    let search = parsed.query().map(|q| format!("?{q}")).unwrap_or_default();
    let separator = if search.is_empty() { "?" } else { "&" };
    format!(
        "http://{relay_host}{path}{search}{separator}{OVERRIDE_HOST_PARAM}={host}",
        path = parsed.path()
    )
}

fn host_with_port(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn encode_pairs<I, K, V>(pairs: I) -> String
where
    I: Iterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key.as_ref(), value.as_ref());
    }
    serializer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bounce_messages::DEFAULT_TARGET_DOMAIN;
    use std::collections::{BTreeMap, HashMap};

    fn job(method: &str, url: &str) -> JobDescription {
        JobDescription {
            request_id: "r1".into(),
            method: method.into(),
            path: url.split('?').next().unwrap_or_default().into(),
            url: Some(url.into()),
            headers: HashMap::new(),
            query_params: BTreeMap::new(),
            body_b64: None,
        }
    }

    #[test]
    fn post_to_bare_files_resource_gains_upload_prefix() {
        let resolved = resolve_target(&job("POST", "/v1beta/files"), DEFAULT_TARGET_DOMAIN);
        assert_eq!(
            resolved.url,
            format!("https://{DEFAULT_TARGET_DOMAIN}/upload/v1beta/files")
        );
    }

    #[test]
    fn upload_prefixed_path_is_unchanged() {
        let resolved = resolve_target(&job("POST", "/upload/v1beta/files"), DEFAULT_TARGET_DOMAIN);
        assert_eq!(
            resolved.url,
            format!("https://{DEFAULT_TARGET_DOMAIN}/upload/v1beta/files")
        );
    }

    #[test]
    fn extra_leading_segments_are_trimmed_to_canonical_suffix() {
        let resolved = resolve_target(
            &job("PUT", "/proxy/upload/v1beta/files/abc-123"),
            DEFAULT_TARGET_DOMAIN,
        );
        assert_eq!(
            resolved.url,
            format!("https://{DEFAULT_TARGET_DOMAIN}/upload/v1beta/files/abc-123")
        );
    }

    #[test]
    fn get_requests_are_not_upload_prefixed() {
        let resolved = resolve_target(&job("GET", "/v1beta/files"), DEFAULT_TARGET_DOMAIN);
        assert_eq!(
            resolved.url,
            format!("https://{DEFAULT_TARGET_DOMAIN}/v1beta/files")
        );
    }

    #[test]
    fn fixup_only_applies_to_the_default_domain_family() {
        let resolved = resolve_target(&job("POST", "/v1beta/files"), "api.other.example");
        assert_eq!(resolved.url, "https://api.other.example/v1beta/files");
    }

    #[test]
    fn absolute_urls_are_narrowed_to_path_and_query() {
        let resolved = resolve_target(
            &job("GET", "https://attacker.example/v1beta/models?alt=sse"),
            DEFAULT_TARGET_DOMAIN,
        );
        assert_eq!(
            resolved.url,
            format!("https://{DEFAULT_TARGET_DOMAIN}/v1beta/models?alt=sse")
        );
        assert_eq!(resolved.host, DEFAULT_TARGET_DOMAIN);
    }

    #[test]
    fn query_params_are_used_when_no_url_is_given() {
        let mut request = job("GET", "");
        request.url = None;
        request.path = "v1beta/models".into();
        request.query_params.insert("alt".into(), "sse".into());
        let resolved = resolve_target(&request, DEFAULT_TARGET_DOMAIN);
        assert_eq!(
            resolved.url,
            format!("https://{DEFAULT_TARGET_DOMAIN}/v1beta/models?alt=sse")
        );
    }

    #[test]
    fn override_host_round_trip() {
        let rewritten = rewrite_upstream_header(
            "https://real-host.example/upload/v1beta/files?x=1",
            "127.0.0.1:8889",
            "real-host.example",
        );
        assert_eq!(
            rewritten,
            "http://127.0.0.1:8889/upload/v1beta/files?x=1&__proxy_host__=real-host.example"
        );

        // The relay bounces the continuation back; only path + query survive.
        let resolved = resolve_target(
            &job("PUT", "/upload/v1beta/files?x=1&__proxy_host__=real-host.example"),
            DEFAULT_TARGET_DOMAIN,
        );
        assert_eq!(resolved.host, "real-host.example");
        assert_eq!(
            resolved.url,
            "https://real-host.example/upload/v1beta/files?x=1"
        );
    }

    #[test]
    fn rewrite_without_existing_query_uses_question_mark() {
        let rewritten = rewrite_upstream_header(
            &format!("https://{DEFAULT_TARGET_DOMAIN}/v1beta/files/abc"),
            "127.0.0.1:8889",
            DEFAULT_TARGET_DOMAIN,
        );
        assert_eq!(
            rewritten,
            format!("http://127.0.0.1:8889/v1beta/files/abc?__proxy_host__={DEFAULT_TARGET_DOMAIN}")
        );
    }

    #[test]
    fn unrelated_hosts_are_left_alone() {
        let value = "https://cdn.example.net/asset.png";
        assert_eq!(
            rewrite_upstream_header(value, "127.0.0.1:8889", "real-host.example"),
            value
        );
        assert_eq!(
            rewrite_upstream_header("not a url", "127.0.0.1:8889", "real-host.example"),
            "not a url"
        );
    }
}
