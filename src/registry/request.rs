//! HTTP request engine for registry endpoints
//!
//! Performs registry GETs with the manifest `Accept` headers the caller
//! asks for, follows `Link` pagination, retries transient failures with a
//! doubling back-off and optionally traces requests and responses.

use std::time::Duration;

use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION};

use crate::error::{LstagsError, Result};

/// Selects which manifest media types to accept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    /// Legacy v1 manifests, the only source of image creation time
    V1,
    /// v2 and OCI manifests, the source of the content digest
    V2,
}

/// Per-request tuning passed down from the client configuration
#[derive(Debug, Clone)]
pub struct RequestSettings {
    pub trace: bool,
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            trace: false,
            retries: 0,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// A fully buffered registry response: the body is read eagerly so trace
/// output and downstream decoding both see it.
#[derive(Debug)]
pub struct RegistryResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RegistryResponse {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

fn request_id() -> String {
    format!("{:07x}", rand::random::<u32>() & 0x0fff_ffff)
}

/// Extracts the pagination cursor from a `Link` header value: the query
/// string between `?` and `>` of the first link.
pub fn next_link(link_header: Option<&str>) -> String {
    let header = match link_header {
        Some(h) => h,
        None => return String::new(),
    };

    let after_question = match header.split_once('?') {
        Some((_, rest)) => rest,
        None => return String::new(),
    };

    after_question
        .split('>')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn accept_headers(mode: RequestMode) -> Vec<&'static str> {
    let mut accepts = vec!["application/json"];

    match mode {
        RequestMode::V1 => {
            accepts.push("application/vnd.docker.distribution.manifest.v1+json");
        }
        RequestMode::V2 => {
            accepts.push("application/vnd.docker.distribution.manifest.v2+json");
            accepts.push("application/vnd.oci.image.index.v1+json");
            accepts.push("application/vnd.oci.image.manifest.v1+json");
        }
    }

    accepts
}

fn trace_exchange(rid: &str, url: &str, mode: RequestMode, authorization: &str, resp: &RegistryResponse) {
    println!("{}|@URL: {} [{:?}]", rid, url, mode);
    for accept in accept_headers(mode) {
        println!("{}|@REQ-HEADER: {:<40} = {}", rid, "Accept", accept);
    }
    if !authorization.is_empty() {
        println!("{}|@REQ-HEADER: {:<40} = {}", rid, "Authorization", authorization);
    }
    for (name, value) in resp.headers.iter() {
        println!(
            "{}|@RESP-HEADER: {:<40} = {}",
            rid,
            name.as_str(),
            value.to_str().unwrap_or("<binary>")
        );
    }
    println!("{}|--- BODY BEGIN ---", rid);
    for line in String::from_utf8_lossy(&resp.body).split('\n') {
        println!("{}|{}", rid, line);
    }
    println!("{}|--- BODY END ---", rid);
}

async fn perform_once(
    http: &reqwest::Client,
    url: &str,
    authorization: &str,
    mode: RequestMode,
    trace: bool,
) -> Result<(RegistryResponse, String)> {
    let mut request = http.get(url);

    for accept in accept_headers(mode) {
        request = request.header(ACCEPT, accept);
    }

    if !authorization.is_empty() {
        request = request.header(AUTHORIZATION, authorization);
    }

    let resp = request.send().await?;

    let status = resp.status().as_u16();
    let headers = resp.headers().clone();
    let body = resp.bytes().await?.to_vec();

    let response = RegistryResponse {
        status,
        headers,
        body,
    };

    if trace {
        trace_exchange(&request_id(), url, mode, authorization, &response);
    }

    match status {
        200 => {
            let link = next_link(response.header("Link").as_deref());
            Ok((response, link))
        }
        404 => Err(LstagsError::NotFound(url.to_string())),
        _ => Err(LstagsError::BadStatus {
            status,
            url: url.to_string(),
        }),
    }
}

fn is_retriable(err: &LstagsError) -> bool {
    match err {
        LstagsError::Network(_) => true,
        LstagsError::BadStatus { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

/// Performs a registry GET, retrying transient failures. The back-off
/// delay doubles after every failed attempt and is local to this request
/// sequence. Returns the buffered response and the `Link` pagination
/// cursor (empty when there is no next page).
pub async fn perform(
    http: &reqwest::Client,
    url: &str,
    authorization: &str,
    mode: RequestMode,
    settings: &RequestSettings,
) -> Result<(RegistryResponse, String)> {
    let tries = 1 + settings.retries;
    let mut delay = settings.retry_delay;

    let mut attempt = 1;
    loop {
        match perform_once(http, url, authorization, mode, settings.trace).await {
            Ok(outcome) => return Ok(outcome),
            Err(err) => {
                if !is_retriable(&err) || attempt >= tries {
                    return Err(err);
                }

                println!("Will retry '{}' [{:?}] in {:?}\n=> Error: {}", url, mode, delay, err);

                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn settings(retries: u32) -> RequestSettings {
        RequestSettings {
            trace: false,
            retries,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_next_link_extraction() {
        assert_eq!(
            next_link(Some("</v2/library/alpine/tags/list?n=100&last=edge>; rel=\"next\"")),
            "n=100&last=edge"
        );
        assert_eq!(next_link(Some("garbage-without-query")), "");
        assert_eq!(next_link(None), "");
    }

    #[tokio::test]
    async fn test_ok_response_is_buffered() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let (resp, link) = perform(
            &http,
            &format!("{}/v2/", server.uri()),
            "",
            RequestMode::V2,
            &settings(0),
        )
        .await
        .unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"{}");
        assert_eq!(link, "");
    }

    #[tokio::test]
    async fn test_sends_mode_specific_accept_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(move |req: &Request| {
                let accepts: Vec<String> = req
                    .headers
                    .get_all(ACCEPT)
                    .iter()
                    .map(|v| v.to_str().unwrap_or_default().to_string())
                    .collect();
                let joined = accepts.join(",");

                if joined.contains("manifest.v2+json") && joined.contains("application/json") {
                    ResponseTemplate::new(200)
                } else {
                    ResponseTemplate::new(400)
                }
            })
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let result = perform(
            &http,
            &format!("{}/v2/", server.uri()),
            "",
            RequestMode::V2,
            &settings(0),
        )
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_retries_on_server_error_then_succeeds() {
        let server = MockServer::start().await;
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        Mock::given(method("GET"))
            .and(path("/v2/flaky"))
            .respond_with(move |_: &Request| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    ResponseTemplate::new(500)
                } else {
                    ResponseTemplate::new(200).set_body_string("ok")
                }
            })
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let (resp, _) = perform(
            &http,
            &format!("{}/v2/flaky", server.uri()),
            "",
            RequestMode::V2,
            &settings(2),
        )
        .await
        .unwrap();

        assert_eq!(resp.body, b"ok");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_404_is_not_retried() {
        let server = MockServer::start().await;
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        Mock::given(method("GET"))
            .and(path("/v2/missing"))
            .respond_with(move |_: &Request| {
                counter.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(404)
            })
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let err = perform(
            &http,
            &format!("{}/v2/missing", server.uri()),
            "",
            RequestMode::V2,
            &settings(3),
        )
        .await
        .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_client_error_fails_fast() {
        let server = MockServer::start().await;
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        Mock::given(method("GET"))
            .and(path("/v2/forbidden"))
            .respond_with(move |_: &Request| {
                counter.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(403)
            })
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let err = perform(
            &http,
            &format!("{}/v2/forbidden", server.uri()),
            "",
            RequestMode::V2,
            &settings(3),
        )
        .await
        .unwrap_err();

        match err {
            LstagsError::BadStatus { status, .. } => assert_eq!(status, 403),
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_429_is_retried() {
        let server = MockServer::start().await;
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        Mock::given(method("GET"))
            .and(path("/v2/throttled"))
            .respond_with(move |_: &Request| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    ResponseTemplate::new(429)
                } else {
                    ResponseTemplate::new(200)
                }
            })
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let result = perform(
            &http,
            &format!("{}/v2/throttled", server.uri()),
            "",
            RequestMode::V2,
            &settings(1),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_link_header_produces_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/paged/tags/list"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"tags":["a"]}"#)
                    .insert_header("Link", "</v2/paged/tags/list?last=a&n=1>; rel=\"next\""),
            )
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let (_, link) = perform(
            &http,
            &format!("{}/v2/paged/tags/list", server.uri()),
            "",
            RequestMode::V2,
            &settings(0),
        )
        .await
        .unwrap();

        assert_eq!(link, "last=a&n=1");
    }
}
