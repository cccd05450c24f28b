//! Application API: collects, compares and synchronizes tags
//!
//! [`Api`] is the main abstraction callers work with: it schedules
//! per-repository workers in bounded batches, joins remote and local tag
//! sets and dispatches pull/push operations with partial-failure
//! tolerance.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::collection::Collection;
use crate::docker::config::{DockerConfig, DEFAULT_DOCKER_JSON};
use crate::docker::{self, DockerClient, DockerDaemon};
use crate::error::{LstagsError, Result};
use crate::logging::Logger;
use crate::registry::{ClientConfig, RegistryClientFactory};
use crate::repository::{RefParser, Repository};
use crate::tag::{self, Tag};
use crate::util;

/// Used when no explicit concurrent request limit is configured
const DEFAULT_API_CONCURRENCY: usize = 8;

/// API instance configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Docker JSON config file with registry credentials
    pub docker_json_config_file: String,
    /// Registry assumed when a reference carries no hostname
    pub default_registry: Option<String>,
    /// How many registry requests may run in parallel
    pub concurrent_requests: usize,
    /// Idle time between batches of requests (incl. pulls and pushes)
    pub wait_between: Duration,
    /// Print registry HTTP request traces
    pub trace_requests: bool,
    /// Retries for failed registry requests
    pub retry_requests: u32,
    /// Delay between a failed registry request and its retry
    pub retry_delay: Duration,
    /// Expression matching insecure (plain HTTP) registry hostnames
    pub insecure_registry_ex: Option<String>,
    /// Print debug log messages
    pub verbose_logging: bool,
    /// Log pull/push operations without performing them
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            docker_json_config_file: DEFAULT_DOCKER_JSON.to_string(),
            default_registry: None,
            concurrent_requests: DEFAULT_API_CONCURRENCY,
            wait_between: Duration::ZERO,
            trace_requests: false,
            retry_requests: 0,
            retry_delay: Duration::from_secs(2),
            insecure_registry_ex: None,
            verbose_logging: false,
            dry_run: false,
        }
    }
}

/// Where and how to push: registry, path prefix and naming templates
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Prefix prepended to the repository path in the "push" registry
    pub prefix: String,
    /// Address of the registry we push to
    pub registry: String,
    /// Re-push images whose tag exists but whose digest changed
    pub update_changed: bool,
    /// Path element separator (for registries allowing one level only)
    pub path_separator: String,
    /// Template rewriting the destination repository path
    pub path_template: String,
    /// Template rewriting the destination tag
    pub tag_template: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            registry: String::new(),
            update_changed: false,
            path_separator: "/".to_string(),
            path_template: "{{ .Prefix }}{{ .Path }}".to_string(),
            tag_template: "{{ .Tag }}".to_string(),
        }
    }
}

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*\.(\w+)\s*\}\}").unwrap());

/// Minimal `{{ .Field }}` substitution used to rewrite push destination
/// paths and tags.
#[derive(Debug, Clone)]
pub struct PushTemplate {
    template: String,
}

impl PushTemplate {
    pub fn new(template: &str) -> Result<Self> {
        let stripped = PLACEHOLDER_RE.replace_all(template, "");
        if stripped.contains("{{") || stripped.contains("}}") {
            return Err(LstagsError::Template(format!(
                "malformed template: {}",
                template
            )));
        }

        Ok(Self {
            template: template.to_string(),
        })
    }

    pub fn render(&self, vars: &[(&str, &str)]) -> Result<String> {
        let mut out = String::new();
        let mut last = 0;

        for caps in PLACEHOLDER_RE.captures_iter(&self.template) {
            let placeholder = match caps.get(0) {
                Some(m) => m,
                None => continue,
            };

            out.push_str(&self.template[last..placeholder.start()]);

            let field = &caps[1];
            let value = vars
                .iter()
                .find(|(name, _)| *name == field)
                .map(|(_, value)| *value)
                .ok_or_else(|| {
                    LstagsError::Template(format!("unknown template field: {}", field))
                })?;

            out.push_str(value);
            last = placeholder.end();
        }

        out.push_str(&self.template[last..]);

        Ok(out)
    }
}

/// Normalizes the push prefix: the configured one wins over the
/// repository-derived default and always gets enclosing slashes.
fn push_prefix(prefix: &str, default_prefix: String) -> String {
    if prefix.is_empty() {
        return default_prefix;
    }

    let mut prefix = prefix.to_string();
    if !prefix.starts_with('/') {
        prefix = format!("/{}", prefix);
    }
    if !prefix.ends_with('/') {
        prefix = format!("{}/", prefix);
    }

    prefix
}

/// Chunks references into batches of at most `batch_size`
fn batched_slices(batch_size: usize, unbatched: &[String]) -> Vec<Vec<String>> {
    if batch_size == 0 {
        return vec![unbatched.to_vec()];
    }

    unbatched
        .chunks(batch_size)
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Configured application API instance
pub struct Api {
    config: Config,
    parser: RefParser,
    docker_config: Arc<DockerConfig>,
    daemon: Arc<dyn DockerDaemon>,
    factory: RegistryClientFactory,
    logger: Logger,
}

impl Api {
    /// Creates a new API instance wired to the local Docker daemon.
    pub fn new(config: Config) -> Result<Self> {
        let parser = RefParser::new(
            config.insecure_registry_ex.as_deref(),
            config.default_registry.as_deref(),
        )?;

        let docker_config = Arc::new(DockerConfig::load(&config.docker_json_config_file)?);

        let daemon = Arc::new(DockerClient::new(
            docker_config.clone(),
            parser.clone(),
            config.retry_requests,
        )?);

        Self::with_daemon(config, daemon)
    }

    /// Creates an API instance around an externally supplied daemon
    /// adapter (used by tests to run against an in-memory fake).
    pub fn with_daemon(mut config: Config, daemon: Arc<dyn DockerDaemon>) -> Result<Self> {
        if config.concurrent_requests == 0 {
            config.concurrent_requests = DEFAULT_API_CONCURRENCY;
        }

        let logger = Logger::new(config.verbose_logging);

        let parser = RefParser::new(
            config.insecure_registry_ex.as_deref(),
            config.default_registry.as_deref(),
        )?;

        let docker_config = Arc::new(DockerConfig::load(&config.docker_json_config_file)?);

        let factory = RegistryClientFactory::new(
            ClientConfig {
                concurrent_requests: config.concurrent_requests,
                wait_between: config.wait_between,
                retry_requests: config.retry_requests,
                retry_delay: config.retry_delay,
                trace_requests: config.trace_requests,
            },
            logger.clone(),
        )?;

        Ok(Self {
            config,
            parser,
            docker_config,
            daemon,
            factory,
            logger,
        })
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    fn credentials(&self, registry: &str) -> (String, String) {
        self.docker_config
            .get_credentials(registry)
            .unwrap_or_default()
    }

    async fn analyze_repo(&self, repo: Repository) -> Result<(String, Vec<Tag>)> {
        self.logger.info(&format!("ANALYZE {}", repo.ref_str()));

        let (username, password) = self.credentials(repo.registry());

        let mut client = self.factory.client_for(repo.registry(), !repo.is_secure());
        client.login(&username, &password).await?;

        let remote_tags = client.fetch_tags(&repo).await?;

        // A missing daemon only costs us local image ids
        let local_tags = docker::fetch_tags_local(self.daemon.as_ref(), &repo)
            .await
            .unwrap_or_default();

        let (sorted_keys, tag_names, joined_tags) = tag::join(&remote_tags, &local_tags, repo.tags());

        self.logger.info(&format!("FETCHED {}", repo.ref_str()));

        Ok((
            repo.ref_str().to_string(),
            tag::collect(&sorted_keys, &tag_names, &joined_tags),
        ))
    }

    /// Collects tag information from remote registries and the local
    /// Docker daemon, compares the sets and returns them organized as a
    /// [`Collection`] preserving the input order of references.
    pub async fn collect_tags(&self, refs: &[String]) -> Result<Collection> {
        if refs.is_empty() {
            return Err(LstagsError::Reference(
                "no image references passed".to_string(),
            ));
        }

        let repos = self.parser.parse_refs(refs)?;

        let mut collected: HashMap<String, Vec<Tag>> = HashMap::new();

        let batches = batched_slices(self.config.concurrent_requests, refs);
        for (index, batch) in batches.iter().enumerate() {
            self.logger
                .info(&format!("BATCH {} of {}", index + 1, batches.len()));

            let workers = batch.iter().map(|reference| {
                let repo = self.parser.parse_ref(reference);

                async move { self.analyze_repo(repo?).await }
            });

            for result in futures::future::join_all(workers).await {
                let (reference, tags) = result?;
                collected.insert(reference, tags);
            }

            tokio::time::sleep(self.config.wait_between).await;
        }

        Collection::new(repos, collected)
    }

    async fn probe_push_repo(
        &self,
        repo: &Repository,
        remote_tags: HashMap<String, Tag>,
        push: &PushConfig,
        path_template: &PushTemplate,
    ) -> Result<(String, Vec<Tag>)> {
        let prefix = push_prefix(&push.prefix, repo.push_prefix());
        let push_path = path_template.render(&[
            ("Prefix", prefix.as_str()),
            ("Path", &repo.push_path(&push.path_separator)),
            ("Name", &repo.name()),
        ])?;

        let push_ref = format!("{}{}~/.*/", push.registry, push_path);

        self.logger
            .info(&format!("[PULL/PUSH] ANALYZE {} => {}", repo.ref_str(), push_ref));

        let push_repo = self.parser.parse_ref(&push_ref)?;

        let (username, password) = self.credentials(&push.registry);

        let mut client = self
            .factory
            .client_for(push_repo.registry(), !push_repo.is_secure());
        client.login(&username, &password).await?;

        let pushed_tags = match client.fetch_tags(&push_repo).await {
            Ok(tags) => tags,
            // A fresh destination repository legitimately does not exist
            // yet; an empty pushed set is the correct answer then.
            Err(err) if err.is_not_found() => {
                self.logger
                    .warning(&format!("repo not found: {}", push_ref));

                HashMap::new()
            }
            Err(err) => return Err(err),
        };

        let (sorted_keys, tag_names, joined_tags) =
            tag::join(&remote_tags, &pushed_tags, repo.tags());

        let tags_to_push: Vec<Tag> = tag::collect(&sorted_keys, &tag_names, &joined_tags)
            .into_iter()
            .filter(|tag| tag.needs_push(push.update_changed))
            .collect();

        Ok((repo.ref_str().to_string(), tags_to_push))
    }

    /// Blends a collection with the tags already present in the "push"
    /// registry and returns the subset that needs pushing.
    pub async fn collect_push_tags(
        &self,
        collection: &Collection,
        push: &PushConfig,
    ) -> Result<Collection> {
        let path_template = PushTemplate::new(&push.path_template)?;

        let workers = collection.repos().into_iter().map(|repo| {
            let remote_tags = collection.tag_map(repo.ref_str());
            let repo = repo.clone();
            let path_template = &path_template;

            async move {
                self.probe_push_repo(&repo, remote_tags, push, path_template)
                    .await
            }
        });

        let mut tags_to_push: HashMap<String, Vec<Tag>> = HashMap::new();
        for result in futures::future::join_all(workers).await {
            let (reference, tags) = result?;
            tags_to_push.insert(reference, tags);
        }

        let repos: Vec<Repository> = collection.repos().into_iter().cloned().collect();

        Collection::new(repos, tags_to_push)
    }

    /// Pulls tags that the state comparison marked as needing a pull.
    /// Individual tag failures do not abort the run; they are logged and
    /// folded into one aggregate error at the end.
    pub async fn pull_tags(&self, collection: &Collection) -> Result<()> {
        let workers = collection.refs().iter().map(|reference| {
            let repo = collection.repo(reference).cloned();
            let tags: Vec<Tag> = collection
                .tags(reference)
                .map(|tags| tags.to_vec())
                .unwrap_or_default();

            async move {
                let mut results: Vec<Result<()>> = Vec::new();

                let repo = match repo {
                    Some(repo) => repo,
                    None => return results,
                };

                for tag in tags {
                    if !tag.needs_pull() {
                        results.push(Ok(()));
                        continue;
                    }

                    let pull_ref = format!("{}:{}", repo.name(), tag.name());

                    self.logger.info(&format!("PULLING {}", pull_ref));
                    if self.config.dry_run {
                        self.logger.info(&format!("[DRY-RUN] PULLED {}", pull_ref));
                        results.push(Ok(()));
                        continue;
                    }

                    match self.daemon.pull(&pull_ref).await {
                        Ok(()) => results.push(Ok(())),
                        Err(err) => {
                            results.push(Err(err));
                            break;
                        }
                    }
                }

                results
            }
        });

        let results: Vec<Result<()>> = futures::future::join_all(workers)
            .await
            .into_iter()
            .flatten()
            .collect();

        let logger = self.logger.clone();
        util::with_tolerance(results, |err| logger.error(&err.to_string()))
    }

    /// Pulls, retags and pushes every tag of the "push" collection to the
    /// destination registry. Same failure tolerance as [`Api::pull_tags`].
    pub async fn push_tags(&self, collection: &Collection, push: &PushConfig) -> Result<()> {
        let path_template = PushTemplate::new(&push.path_template)?;
        let tag_template = PushTemplate::new(&push.tag_template)?;

        if collection.tag_count() == 0 {
            self.logger.info("No tags to push");
            return Ok(());
        }

        let workers = collection.refs().iter().map(|reference| {
            let repo = collection.repo(reference).cloned();
            let tags: Vec<Tag> = collection
                .tags(reference)
                .map(|tags| tags.to_vec())
                .unwrap_or_default();
            let path_template = &path_template;
            let tag_template = &tag_template;

            async move {
                let mut results: Vec<Result<()>> = Vec::new();

                let repo = match repo {
                    Some(repo) => repo,
                    None => return results,
                };

                for tag in tags {
                    let result = self
                        .push_one(&repo, &tag, push, path_template, tag_template)
                        .await;

                    let failed = result.is_err();
                    results.push(result);
                    if failed {
                        break;
                    }
                }

                results
            }
        });

        let results: Vec<Result<()>> = futures::future::join_all(workers)
            .await
            .into_iter()
            .flatten()
            .collect();

        let logger = self.logger.clone();
        util::with_tolerance(results, |err| logger.error(&err.to_string()))
    }

    async fn push_one(
        &self,
        repo: &Repository,
        tag: &Tag,
        push: &PushConfig,
        path_template: &PushTemplate,
        tag_template: &PushTemplate,
    ) -> Result<()> {
        let src_ref = format!("{}:{}", repo.name(), tag.name());

        let prefix = push_prefix(&push.prefix, repo.push_prefix());
        let push_path = repo.push_path(&push.path_separator);

        let full_path = path_template.render(&[
            ("Prefix", prefix.as_str()),
            ("Path", push_path.as_str()),
            ("Name", &repo.name()),
        ])?;
        let tag_name = tag_template.render(&[
            ("Prefix", prefix.as_str()),
            ("Path", push_path.as_str()),
            ("Name", &repo.name()),
            ("Tag", tag.name()),
        ])?;

        let dst_ref = format!("{}{}:{}", push.registry, full_path, tag_name);

        self.logger
            .info(&format!("[PULL/PUSH] PUSHING {} => {}", src_ref, dst_ref));
        if self.config.dry_run {
            self.logger
                .info(&format!("[DRY-RUN] PUSHED {} => {}", src_ref, dst_ref));
            return Ok(());
        }

        self.daemon.pull(&src_ref).await?;
        self.daemon.tag(&src_ref, &dst_ref).await?;
        self.daemon.push(&dst_ref).await?;

        Ok(())
    }
}
