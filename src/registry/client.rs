//! High-level registry client
//!
//! Wraps authentication and the request engine into the operations the
//! rest of the application consumes: ping, login, paginated tag listing
//! and per-tag detail resolution. Clients are produced by
//! [`RegistryClientFactory`], which owns the shared token cache. There
//! is no process-global state, so tests can construct independent
//! instances freely.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{LstagsError, Result};
use crate::logging::Logger;
use crate::registry::auth::{self, Token, TokenCache, TokenMethod};
use crate::registry::request::{self, RequestMode, RequestSettings};
use crate::repository::Repository;
use crate::tag::manifest::{self, Manifest, RawManifest};
use crate::tag::{Tag, TagOptions};

/// Hard limit for simultaneous registry requests
pub const MAX_CONCURRENT_REQUESTS: usize = 256;

/// Used when no explicit concurrent request limit is configured
pub const DEFAULT_CONCURRENT_REQUESTS: usize = 32;

/// Used when no explicit retry delay is configured
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Digest assigned to manifests that expose no digest at all; never equal
/// to a real digest, so such tags always compare as changed.
pub const NO_DIGEST_SENTINEL: &str = "this.image.is.bad.it.has.no.digest.fuuu!";

/// Registry client tuning knobs
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How many requests against one registry may run concurrently
    pub concurrent_requests: usize,
    /// Idle time between batches of requests
    pub wait_between: Duration,
    /// Retries for a failed HTTP request
    pub retry_requests: u32,
    /// Initial delay between a failed HTTP request and its retry
    pub retry_delay: Duration,
    /// Print request/response traces
    pub trace_requests: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            concurrent_requests: DEFAULT_CONCURRENT_REQUESTS,
            wait_between: Duration::ZERO,
            retry_requests: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
            trace_requests: false,
        }
    }
}

/// Creates [`RegistryClient`] instances sharing one HTTP connection pool
/// and one token cache, configured once per run.
#[derive(Clone)]
pub struct RegistryClientFactory {
    config: ClientConfig,
    token_cache: Arc<TokenCache>,
    http: reqwest::Client,
    logger: Logger,
}

impl RegistryClientFactory {
    pub fn new(mut config: ClientConfig, logger: Logger) -> Result<Self> {
        if config.concurrent_requests == 0 {
            config.concurrent_requests = DEFAULT_CONCURRENT_REQUESTS;
        }

        if config.retry_delay.is_zero() {
            config.retry_delay = DEFAULT_RETRY_DELAY;
        }

        if config.concurrent_requests > MAX_CONCURRENT_REQUESTS {
            return Err(LstagsError::Config(format!(
                "could not run more than {} concurrent requests ({} configured)",
                MAX_CONCURRENT_REQUESTS, config.concurrent_requests
            )));
        }

        Ok(Self {
            token_cache: Arc::new(TokenCache::new(config.wait_between)),
            config,
            http: reqwest::Client::new(),
            logger,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Builds a client for one registry host. `insecure` selects plain
    /// HTTP (derived from the repository's insecure-registry match).
    pub fn client_for(&self, registry: &str, insecure: bool) -> RegistryClient {
        RegistryClient {
            registry: registry.to_string(),
            username: String::new(),
            password: String::new(),
            insecure,
            config: self.config.clone(),
            token: None,
            repo_tokens: Mutex::new(HashMap::new()),
            token_cache: self.token_cache.clone(),
            http: self.http.clone(),
            logger: self.logger.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagData {
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default, rename = "manifest")]
    manifests: HashMap<String, RawManifest>,
}

#[derive(Debug, Deserialize)]
struct ManifestConfig {
    #[serde(default)]
    digest: String,
}

#[derive(Debug, Deserialize)]
struct V2Manifest {
    #[serde(default)]
    config: Option<ManifestConfig>,
}

#[derive(Debug, Deserialize)]
struct V1History {
    #[serde(default, rename = "v1Compatibility")]
    v1_compatibility: String,
}

#[derive(Debug, Deserialize)]
struct V1Manifest {
    #[serde(default)]
    history: Vec<V1History>,
}

#[derive(Debug, Deserialize)]
struct V1Compatibility {
    #[serde(default)]
    created: String,
    #[serde(default)]
    container: String,
}

/// Client for a single registry host. Works with connection,
/// authentication and information retrieval; not with image content.
pub struct RegistryClient {
    registry: String,
    username: String,
    password: String,
    insecure: bool,
    config: ClientConfig,
    token: Option<Token>,
    repo_tokens: Mutex<HashMap<String, Token>>,
    token_cache: Arc<TokenCache>,
    http: reqwest::Client,
    logger: Logger,
}

impl RegistryClient {
    fn web_scheme(&self) -> &'static str {
        if self.insecure {
            "http://"
        } else {
            "https://"
        }
    }

    /// Base URL of the registry's V2 API
    pub fn url(&self) -> String {
        format!("{}{}/v2/", self.web_scheme(), self.registry)
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    fn settings(&self) -> RequestSettings {
        RequestSettings {
            trace: self.config.trace_requests,
            retries: self.config.retry_requests,
            retry_delay: self.config.retry_delay,
        }
    }

    /// Checks basic connectivity: an open registry answers 200, an
    /// authenticating one 401. Anything else is a failure.
    pub async fn ping(&self) -> Result<()> {
        let url = self.url();
        let resp = self.http.get(&url).send().await?;

        let status = resp.status().as_u16();
        if status != 200 && status != 401 {
            return Err(LstagsError::BadStatus { status, url });
        }

        Ok(())
    }

    /// Logs in to the registry. Catalog access is requested with the
    /// widest scope first, then retried with a narrower one; anonymous
    /// sessions are accepted when no credentials were given.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        if let Some(token) = self.token_cache.get(&self.registry) {
            self.token = Some(token);
            self.username = username.to_string();
            self.password = password.to_string();
            return Ok(());
        }

        self.token_cache.throttle().await;

        let token =
            match auth::new_token(&self.http, &self.url(), username, password, "registry:catalog:*")
                .await
            {
                Ok(token) => token,
                Err(_) => {
                    self.logger
                        .verbose("Trying to login with less permissions (repository:catalog:*)");

                    match auth::new_token(
                        &self.http,
                        &self.url(),
                        username,
                        password,
                        "repository:catalog:*",
                    )
                    .await
                    {
                        Ok(token) => token,
                        Err(err) => {
                            if username.is_empty() && password.is_empty() {
                                return Ok(());
                            }

                            return Err(err);
                        }
                    }
                }
            };

        self.token_cache.set(&self.registry, token.clone());
        self.token = Some(token);
        self.username = username.to_string();
        self.password = password.to_string();

        Ok(())
    }

    pub fn is_logged_in(&self) -> bool {
        self.token.is_some()
    }

    /// Gets the token to use for a repository path: the primary token
    /// unless it is (or would have to be) a Bearer one, in which case a
    /// pull-scoped repository token is obtained and memoized.
    async fn repo_token(&self, repo_path: &str) -> Result<Token> {
        if let Some(token) = &self.token {
            if token.method() != TokenMethod::Bearer {
                return Ok(token.clone());
            }
        }

        let cache_key = format!("{}/{}", self.registry, repo_path);

        if let Ok(tokens) = self.repo_tokens.lock() {
            if let Some(token) = tokens.get(repo_path) {
                return Ok(token.clone());
            }
        }

        if let Some(token) = self.token_cache.get(&cache_key) {
            return Ok(token);
        }

        self.token_cache.throttle().await;

        let token = auth::new_token(
            &self.http,
            &self.url(),
            &self.username,
            &self.password,
            &format!("repository:{}:pull", repo_path),
        )
        .await?;

        self.token_cache.set(&cache_key, token.clone());
        if let Ok(mut tokens) = self.repo_tokens.lock() {
            tokens.insert(repo_path.to_string(), token.clone());
        }

        Ok(token)
    }

    /// Lists all tag names for a repository path, following `Link`
    /// pagination, together with the extra manifest data some registries
    /// attach to the listing (re-keyed by tag name).
    pub async fn tag_data(
        &self,
        repo_path: &str,
    ) -> Result<(Vec<String>, HashMap<String, Manifest>)> {
        let token = self.repo_token(repo_path).await?;
        let authorization = token.auth_header();

        let mut all_tag_names: Vec<String> = Vec::new();
        let mut all_manifests: HashMap<String, Manifest> = HashMap::new();

        let mut link = "/tags/list".to_string();
        loop {
            let url = format!("{}{}{}", self.url(), repo_path, link);
            let (resp, nextlink) =
                request::perform(&self.http, &url, &authorization, RequestMode::V2, &self.settings())
                    .await?;

            let tag_data: TagData = resp.json()?;

            all_tag_names.extend(tag_data.tags);
            let page_manifests = manifest::map_by_tag(&manifest::parse_map(&tag_data.manifests)?);
            all_manifests = manifest::merge_maps(all_manifests, page_manifests);

            if nextlink.is_empty() {
                break;
            }

            link = format!("/tags/list?{}", nextlink);
        }

        Ok((all_tag_names, all_manifests))
    }

    async fn tag_digest(&self, repo_path: &str, tag_name: &str, authorization: &str) -> Result<String> {
        let url = format!("{}{}/manifests/{}", self.url(), repo_path, tag_name);
        let (resp, _) =
            request::perform(&self.http, &url, authorization, RequestMode::V2, &self.settings())
                .await?;

        // The response header is authoritative when present
        if let Some(digest) = resp.header("Docker-Content-Digest") {
            if !digest.is_empty() {
                return Ok(digest);
            }
        }

        let v2_manifest: V2Manifest = resp.json()?;
        let digest = v2_manifest.config.map(|c| c.digest).unwrap_or_default();

        if digest.is_empty() {
            return Ok(NO_DIGEST_SENTINEL.to_string());
        }

        Ok(digest)
    }

    async fn v1_tag_options(
        &self,
        repo_path: &str,
        tag_name: &str,
        authorization: &str,
    ) -> Result<TagOptions> {
        let url = format!("{}{}/manifests/{}", self.url(), repo_path, tag_name);
        let (resp, _) =
            request::perform(&self.http, &url, authorization, RequestMode::V1, &self.settings())
                .await?;

        let v1_manifest: V1Manifest = resp.json()?;

        let history = v1_manifest
            .history
            .first()
            .ok_or_else(|| LstagsError::Tag("no v1 history to extract data from".to_string()))?;

        let compatibility: V1Compatibility = serde_json::from_str(&history.v1_compatibility)?;

        let created = chrono::DateTime::parse_from_rfc3339(&compatibility.created)
            .map_err(|e| {
                LstagsError::Tag(format!("bad v1 creation time '{}': {}", compatibility.created, e))
            })?
            .timestamp();

        Ok(TagOptions {
            digest: String::new(),
            image_id: compatibility.container,
            created,
        })
    }

    /// Resolves one tag to a full [`Tag`] value. The digest (v2) and the
    /// creation metadata (v1) are fetched concurrently; a v2 failure is
    /// fatal, a v1 failure degrades to the listing manifest's timestamps.
    pub async fn tag(
        &self,
        repo_path: &str,
        tag_name: &str,
        tag_manifest: &Manifest,
    ) -> Result<Tag> {
        let token = self.repo_token(repo_path).await?;
        let authorization = token.auth_header();

        let (digest, v1_options) = tokio::join!(
            self.tag_digest(repo_path, tag_name, &authorization),
            self.v1_tag_options(repo_path, tag_name, &authorization),
        );

        let mut options = match v1_options {
            Ok(options) => options,
            Err(err) => {
                self.logger.verbose(&format!(
                    "no v1 metadata for {}:{} ({})",
                    repo_path, tag_name, err
                ));

                TagOptions::default()
            }
        };

        options.digest = digest?;

        if options.created == 0 {
            options.created = tag_manifest.created();
        }

        Tag::new(tag_name, options)
    }

    /// Looks up all tags of a repository present on the remote registry:
    /// lists the names, filters them through the repository's tag/filter
    /// specification and resolves details in batches bounded by the
    /// configured concurrency. Tags that 404 during detail resolution
    /// (e.g. deleted mid-listing) are skipped.
    pub async fn fetch_tags(&self, repo: &Repository) -> Result<HashMap<String, Tag>> {
        let repo_path = repo.path();
        let (all_tag_names, manifests) = self.tag_data(&repo_path).await?;

        let tag_names: Vec<String> = all_tag_names
            .into_iter()
            .filter(|name| repo.match_tag(name))
            .collect();

        let mut tags: HashMap<String, Tag> = HashMap::new();

        for batch in tag_names.chunks(self.config.concurrent_requests) {
            let futures = batch.iter().map(|tag_name| {
                let tag_manifest = manifests.get(tag_name).cloned().unwrap_or_default();
                let repo_path = repo_path.clone();

                async move { self.tag(&repo_path, tag_name, &tag_manifest).await }
            });

            for result in futures::future::join_all(futures).await {
                match result {
                    Ok(tag) => {
                        tags.insert(tag.name().to_string(), tag);
                    }
                    Err(err) if err.is_not_found() => {
                        self.logger.warning(&err.to_string());
                    }
                    Err(err) => return Err(err),
                }
            }

            tokio::time::sleep(self.config.wait_between).await;
        }

        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn factory() -> RegistryClientFactory {
        RegistryClientFactory::new(
            ClientConfig {
                retry_delay: Duration::from_millis(1),
                ..Default::default()
            },
            Logger::new_quiet(),
        )
        .unwrap()
    }

    fn test_client(server: &MockServer) -> RegistryClient {
        let host = server.uri().trim_start_matches("http://").to_string();
        factory().client_for(&host, true)
    }

    #[test]
    fn test_concurrency_ceiling_is_enforced() {
        let config = ClientConfig {
            concurrent_requests: MAX_CONCURRENT_REQUESTS + 1,
            ..Default::default()
        };

        assert!(RegistryClientFactory::new(config, Logger::new_quiet()).is_err());
    }

    #[test]
    fn test_url_schema_follows_insecure_flag() {
        let factory = factory();
        assert_eq!(
            factory.client_for("registry.company.io", false).url(),
            "https://registry.company.io/v2/"
        );
        assert_eq!(
            factory.client_for("localhost:5000", true).url(),
            "http://localhost:5000/v2/"
        );
    }

    #[tokio::test]
    async fn test_ping_accepts_200_and_401() {
        for status in [200, 401] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/v2/"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            assert!(test_client(&server).ping().await.is_ok(), "status {}", status);
        }

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(test_client(&server).ping().await.is_err());
    }

    #[tokio::test]
    async fn test_login_open_registry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut client = test_client(&server);
        client.login("", "").await.unwrap();

        assert!(client.is_logged_in());
    }

    #[tokio::test]
    async fn test_login_bearer_scope_fallback() {
        let server = MockServer::start().await;
        let realm = format!("{}/token", server.uri());

        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(
                ResponseTemplate::new(401).insert_header(
                    "Www-Authenticate",
                    format!(r#"Bearer realm="{}",service="test-registry""#, realm).as_str(),
                ),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/token"))
            .respond_with(move |req: &Request| {
                let query = req.url.query().unwrap_or_default();

                // the wide catalog scope is rejected, the narrow one works
                if query.contains("registry:catalog") || query.contains("registry%3Acatalog") {
                    ResponseTemplate::new(401)
                } else {
                    ResponseTemplate::new(200)
                        .set_body_json(json!({"token": "narrow", "expires_in": 60}))
                }
            })
            .mount(&server)
            .await;

        let mut client = test_client(&server);
        client.login("user", "secret").await.unwrap();

        assert!(client.is_logged_in());
    }

    #[tokio::test]
    async fn test_login_anonymous_fallback_without_credentials() {
        let server = MockServer::start().await;
        let realm = format!("{}/token", server.uri());

        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(
                ResponseTemplate::new(401).insert_header(
                    "Www-Authenticate",
                    format!(r#"Bearer realm="{}",service="test-registry""#, realm).as_str(),
                ),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut client = test_client(&server);
        client.login("", "").await.unwrap();

        assert!(!client.is_logged_in());

        let mut with_creds = test_client(&server);
        assert!(with_creds.login("user", "bad").await.is_err());
    }

    fn open_registry_mock() -> Mock {
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(ResponseTemplate::new(200))
    }

    #[tokio::test]
    async fn test_tag_data_follows_pagination() {
        let server = MockServer::start().await;
        open_registry_mock().mount(&server).await;

        let base = server.uri();
        Mock::given(method("GET"))
            .and(path("/v2/library/alpine/tags/list"))
            .respond_with(move |req: &Request| {
                let _ = &base;
                match req.url.query() {
                    None => ResponseTemplate::new(200)
                        .set_body_json(json!({"tags": ["3.6", "3.7"]}))
                        .insert_header("Link", "</v2/library/alpine/tags/list?last=3.7&n=2>; rel=\"next\""),
                    Some("last=3.7&n=2") => ResponseTemplate::new(200)
                        .set_body_json(json!({"tags": ["3.8", "edge"]}))
                        .insert_header("Link", "</v2/library/alpine/tags/list?last=edge&n=2>; rel=\"next\""),
                    Some(_) => ResponseTemplate::new(200).set_body_json(json!({"tags": ["latest"]})),
                }
            })
            .expect(3)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let (tag_names, manifests) = client.tag_data("library/alpine").await.unwrap();

        assert_eq!(tag_names, ["3.6", "3.7", "3.8", "edge", "latest"]);
        assert!(manifests.is_empty());
    }

    #[tokio::test]
    async fn test_tag_data_parses_gcr_manifests() {
        let server = MockServer::start().await;
        open_registry_mock().mount(&server).await;

        Mock::given(method("GET"))
            .and(path("/v2/my/app/tags/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tags": ["v1"],
                "manifest": {
                    "sha256:abc": {
                        "imageSizeBytes": "123",
                        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
                        "tag": ["v1"],
                        "timeCreatedMs": "0",
                        "timeUploadedMs": "1518529000000"
                    }
                }
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let (tag_names, manifests) = client.tag_data("my/app").await.unwrap();

        assert_eq!(tag_names, ["v1"]);
        assert_eq!(manifests["v1"].created(), 1518529000);
    }

    fn v1_manifest_body(created: &str, container: &str) -> serde_json::Value {
        json!({
            "history": [
                {"v1Compatibility": format!(r#"{{"created":"{}","container":"{}"}}"#, created, container)}
            ]
        })
    }

    #[tokio::test]
    async fn test_tag_prefers_digest_header() {
        let server = MockServer::start().await;
        open_registry_mock().mount(&server).await;

        Mock::given(method("GET"))
            .and(path("/v2/my/app/manifests/v1"))
            .respond_with(move |req: &Request| {
                let accept = req
                    .headers
                    .get_all("Accept")
                    .iter()
                    .map(|v| v.to_str().unwrap_or_default().to_string())
                    .collect::<Vec<_>>()
                    .join(",");

                if accept.contains("manifest.v2+json") {
                    ResponseTemplate::new(200)
                        .insert_header("Docker-Content-Digest", "sha256:from-header")
                        .set_body_json(json!({"config": {"digest": "sha256:from-body"}}))
                } else {
                    ResponseTemplate::new(200)
                        .set_body_json(v1_manifest_body("2018-02-13T13:32:36Z", "sha256:cafebabecafebabe"))
                }
            })
            .mount(&server)
            .await;

        let client = test_client(&server);
        let tag = client.tag("my/app", "v1", &Manifest::default()).await.unwrap();

        assert_eq!(tag.digest(), "sha256:from-header");
        assert_eq!(tag.image_id(), "cafebabecafe");
        assert_eq!(tag.created(), 1518528756);
    }

    #[tokio::test]
    async fn test_tag_falls_back_to_body_digest() {
        let server = MockServer::start().await;
        open_registry_mock().mount(&server).await;

        Mock::given(method("GET"))
            .and(path("/v2/my/app/manifests/v1"))
            .respond_with(move |req: &Request| {
                let accept = req
                    .headers
                    .get_all("Accept")
                    .iter()
                    .map(|v| v.to_str().unwrap_or_default().to_string())
                    .collect::<Vec<_>>()
                    .join(",");

                if accept.contains("manifest.v2+json") {
                    ResponseTemplate::new(200)
                        .set_body_json(json!({"config": {"digest": "sha256:from-body"}}))
                } else {
                    ResponseTemplate::new(200)
                        .set_body_json(v1_manifest_body("2018-02-13T13:32:36Z", ""))
                }
            })
            .mount(&server)
            .await;

        let client = test_client(&server);
        let tag = client.tag("my/app", "v1", &Manifest::default()).await.unwrap();

        assert_eq!(tag.digest(), "sha256:from-body");
    }

    #[tokio::test]
    async fn test_tag_without_any_digest_gets_sentinel() {
        let server = MockServer::start().await;
        open_registry_mock().mount(&server).await;

        Mock::given(method("GET"))
            .and(path("/v2/my/app/manifests/v1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let tag = client.tag("my/app", "v1", &Manifest::default()).await.unwrap();

        assert_eq!(tag.digest(), NO_DIGEST_SENTINEL);
        // no v1 metadata either, so creation time stays unknown
        assert_eq!(tag.created(), 0);
    }

    #[tokio::test]
    async fn test_tag_v1_failure_degrades_to_manifest_times() {
        let server = MockServer::start().await;
        open_registry_mock().mount(&server).await;

        Mock::given(method("GET"))
            .and(path("/v2/my/app/manifests/v1"))
            .respond_with(move |req: &Request| {
                let accept = req
                    .headers
                    .get_all("Accept")
                    .iter()
                    .map(|v| v.to_str().unwrap_or_default().to_string())
                    .collect::<Vec<_>>()
                    .join(",");

                if accept.contains("manifest.v2+json") {
                    ResponseTemplate::new(200)
                        .insert_header("Docker-Content-Digest", "sha256:abc")
                } else {
                    ResponseTemplate::new(500)
                }
            })
            .mount(&server)
            .await;

        let listing_manifest = Manifest {
            time_uploaded: 1518529000,
            ..Default::default()
        };

        let client = test_client(&server);
        let tag = client.tag("my/app", "v1", &listing_manifest).await.unwrap();

        assert_eq!(tag.digest(), "sha256:abc");
        assert_eq!(tag.created(), 1518529000);
    }

    #[tokio::test]
    async fn test_fetch_tags_applies_repository_filter() {
        let server = MockServer::start().await;
        open_registry_mock().mount(&server).await;

        Mock::given(method("GET"))
            .and(path("/v2/x/y/tags/list"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"tags": ["v1", "v2", "latest"]})),
            )
            .mount(&server)
            .await;

        for tag_name in ["v1", "v2"] {
            Mock::given(method("GET"))
                .and(path(format!("/v2/x/y/manifests/{}", tag_name)))
                .respond_with(
                    ResponseTemplate::new(200)
                        .insert_header("Docker-Content-Digest", format!("sha256:{}", tag_name).as_str())
                        .set_body_json(v1_manifest_body("2018-02-13T13:32:36Z", "")),
                )
                .mount(&server)
                .await;
        }

        let host = server.uri().trim_start_matches("http://").to_string();
        let repo = crate::repository::RefParser::default()
            .parse_ref(&format!("{}/x/y~/^v[0-9]/", host))
            .unwrap();

        let client = test_client(&server);
        let tags = client.fetch_tags(&repo).await.unwrap();

        assert_eq!(tags.len(), 2);
        assert_eq!(tags["v1"].digest(), "sha256:v1");
        assert_eq!(tags["v2"].digest(), "sha256:v2");
        assert!(!tags.contains_key("latest"));
    }
}
