//! Application runner: wires options into the API, renders the tag table
//! and drives the optional daemon polling loop.

use crate::api::{Api, Config, PushConfig};
use crate::cli::args::Options;
use crate::collection::Collection;
use crate::config as yamlconfig;
use crate::error::Result;
use crate::logging::Logger;

/// Exit code for non-critical failures swallowed by `--do-not-fail`
const EXIT_DO_NOT_FAIL: i32 = 254;

pub struct Runner {
    options: Options,
    logger: Logger,
    exit_code: i32,
}

/// Renders the collection as the fixed-width tag table
pub fn render_table(collection: &Collection) -> String {
    let mut out = String::new();

    out.push_str("-\n");
    out.push_str(&format!(
        "{:<12} {:<45} {:<15} {:<25} {}:{}\n",
        "<STATE>", "<DIGEST>", "<(local) ID>", "<Created At>", "<IMAGE>", "<TAG>"
    ));

    for reference in collection.refs() {
        let repo = match collection.repo(reference) {
            Some(repo) => repo,
            None => continue,
        };

        if let Some(tags) = collection.tags(reference) {
            for tag in tags {
                out.push_str(&format!(
                    "{:<12} {:<45} {:<15} {:<25} {}:{}\n",
                    tag.state_label(),
                    tag.short_digest(),
                    tag.image_id(),
                    tag.created_string(),
                    repo.name(),
                    tag.name(),
                ));
            }
        }
    }

    out.push_str("-\n");

    out
}

impl Runner {
    pub fn new(mut options: Options) -> Result<Self> {
        options.postprocess()?;

        let logger = Logger::new(options.verbose);

        Ok(Self {
            options,
            logger,
            exit_code: 0,
        })
    }

    fn api_config(&self) -> Config {
        Config {
            docker_json_config_file: self.options.docker_json.clone(),
            default_registry: self.options.default_registry.clone(),
            concurrent_requests: self.options.concurrent_requests,
            wait_between: self.options.wait_between,
            trace_requests: self.options.trace_requests,
            retry_requests: self.options.retry_requests,
            retry_delay: self.options.retry_delay,
            insecure_registry_ex: self.options.insecure_registry_ex.clone(),
            verbose_logging: self.options.verbose,
            dry_run: self.options.dry_run,
        }
    }

    fn push_config(&self) -> PushConfig {
        PushConfig {
            registry: self.options.push_registry.clone().unwrap_or_default(),
            prefix: self.options.push_prefix.clone(),
            update_changed: self.options.push_update,
            path_separator: self.options.path_separator.clone(),
            path_template: self.options.push_path_template.clone(),
            tag_template: self.options.push_tag_template.clone(),
        }
    }

    /// Reports a failure and decides whether the run is over: critical
    /// failures (and any failure without `--do-not-fail`) end the process
    /// with exit code 1, everything else flips the final exit code to 254.
    fn suicide(&mut self, err: &crate::error::LstagsError, critical: bool) -> bool {
        self.logger.error(&err.to_string());

        if !self.options.do_not_fail || critical {
            return true;
        }

        self.exit_code = EXIT_DO_NOT_FAIL;

        false
    }

    fn repositories(&mut self) -> std::result::Result<Vec<String>, bool> {
        let yaml_config = self.options.yaml_config.clone();

        match yaml_config {
            Some(path) => match yamlconfig::load_yaml_file(&path) {
                Ok(config) => Ok(config.repositories),
                Err(err) => Err(self.suicide(&err, !self.options.daemon_mode)),
            },
            None => Ok(self.options.repositories.clone()),
        }
    }

    pub async fn run(&mut self) -> i32 {
        let api = match Api::new(self.api_config()) {
            Ok(api) => api,
            Err(err) => {
                self.suicide(&err, true);
                return 1;
            }
        };

        loop {
            let repositories = match self.repositories() {
                Ok(repositories) => repositories,
                Err(fatal) => {
                    if fatal {
                        return 1;
                    }

                    self.wait_for_next_poll().await;
                    continue;
                }
            };

            let collection = match api.collect_tags(&repositories).await {
                Ok(collection) => collection,
                Err(err) => {
                    if self.suicide(&err, !self.options.daemon_mode) {
                        return 1;
                    }

                    self.wait_for_next_poll().await;
                    continue;
                }
            };

            print!("{}", render_table(&collection));

            if self.options.pull {
                if let Err(err) = api.pull_tags(&collection).await {
                    if self.suicide(&err, false) {
                        return 1;
                    }
                }
            }

            if self.options.push {
                let push_config = self.push_config();

                match api.collect_push_tags(&collection, &push_config).await {
                    Ok(push_collection) => {
                        if let Err(err) = api.push_tags(&push_collection, &push_config).await {
                            if self.suicide(&err, false) {
                                return 1;
                            }
                        }
                    }
                    Err(err) => {
                        if self.suicide(&err, false) {
                            return 1;
                        }
                    }
                }
            }

            if !self.options.daemon_mode {
                return self.exit_code;
            }

            self.wait_for_next_poll().await;
        }
    }

    async fn wait_for_next_poll(&self) {
        self.logger
            .info(&format!("WAIT: {:?}\n-", self.options.polling_interval));

        tokio::time::sleep(self.options.polling_interval).await;
    }
}
