//! Command-line argument parsing
//!
//! Every flag mirrors an upper-snake-case environment variable, so the
//! tool is equally usable from a shell and from a container spec.

use std::time::Duration;

use clap::Parser;

use crate::error::{LstagsError, Result};

/// Configuration options extracted from command line arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "lstags")]
#[command(about = "Lists, compares and synchronizes Docker image tags between registries")]
#[command(version)]
pub struct Options {
    /// YAML file to load repositories from
    #[arg(short = 'f', long = "yaml-config", env = "YAML_CONFIG")]
    pub yaml_config: Option<String>,

    /// JSON file with registry credentials
    #[arg(
        short = 'j',
        long = "docker-json",
        env = "DOCKER_JSON",
        default_value = "~/.docker/config.json"
    )]
    pub docker_json: String,

    /// Pull images matched by filter (uses the local Docker daemon)
    #[arg(short = 'p', long = "pull", env = "PULL")]
    pub pull: bool,

    /// Push matched images to another registry (see 'push-registry')
    #[arg(short = 'P', long = "push", env = "PUSH")]
    pub push: bool,

    /// Dry run pull or push
    #[arg(long = "dry-run", env = "DRY_RUN")]
    pub dry_run: bool,

    /// [Re]Push pulled images to the specified remote registry
    #[arg(short = 'r', long = "push-registry", env = "PUSH_REGISTRY")]
    pub push_registry: Option<String>,

    /// [Re]Push pulled images with the specified repo path prefix
    #[arg(short = 'R', long = "push-prefix", env = "PUSH_PREFIX", default_value = "")]
    pub push_prefix: String,

    /// Template to change the push repo path
    #[arg(
        long = "push-path-template",
        env = "PUSH_PATH_TEMPLATE",
        default_value = "{{ .Prefix }}{{ .Path }}"
    )]
    pub push_path_template: String,

    /// Template to change the push tag
    #[arg(
        long = "push-tag-template",
        env = "PUSH_TAG_TEMPLATE",
        default_value = "{{ .Tag }}"
    )]
    pub push_tag_template: String,

    /// Update pushed images when the remote image digest changes
    #[arg(short = 'U', long = "push-update", env = "PUSH_UPDATE")]
    pub push_update: bool,

    /// Path separator for registries that only allow a single folder depth
    #[arg(
        short = 's',
        long = "path-separator",
        env = "PATH_SEPARATOR",
        default_value = "/"
    )]
    pub path_separator: String,

    /// Limit of concurrent requests to the registry
    #[arg(
        short = 'c',
        long = "concurrent-requests",
        env = "CONCURRENT_REQUESTS",
        default_value_t = 16
    )]
    pub concurrent_requests: usize,

    /// Time to wait between batches of requests (incl. pulls and pushes)
    #[arg(
        short = 'w',
        long = "wait-between",
        env = "WAIT_BETWEEN",
        default_value = "0s",
        value_parser = humantime::parse_duration
    )]
    pub wait_between: Duration,

    /// Number of retries for failed Docker registry requests
    #[arg(
        short = 'y',
        long = "retry-requests",
        env = "RETRY_REQUESTS",
        default_value_t = 2
    )]
    pub retry_requests: u32,

    /// Delay between retries of failed registry requests
    #[arg(
        short = 'D',
        long = "retry-delay",
        env = "RETRY_DELAY",
        default_value = "2s",
        value_parser = humantime::parse_duration
    )]
    pub retry_delay: Duration,

    /// Default Docker registry to use
    #[arg(long = "default-registry", env = "DEFAULT_REGISTRY")]
    pub default_registry: Option<String>,

    /// Expression to match insecure registry hostnames
    #[arg(short = 'I', long = "insecure-registry-ex", env = "INSECURE_REGISTRY_EX")]
    pub insecure_registry_ex: Option<String>,

    /// Trace Docker registry HTTP requests
    #[arg(short = 'T', long = "trace-requests", env = "TRACE_REQUESTS")]
    pub trace_requests: bool,

    /// Do not fail on non-critical errors (could be dangerous!)
    #[arg(short = 'N', long = "do-not-fail", env = "DO_NOT_FAIL")]
    pub do_not_fail: bool,

    /// Run as daemon instead of just execute and exit
    #[arg(short = 'd', long = "daemon-mode", env = "DAEMON_MODE")]
    pub daemon_mode: bool,

    /// Wait between polls when running in daemon mode
    #[arg(
        short = 'i',
        long = "polling-interval",
        env = "POLLING_INTERVAL",
        default_value = "60s",
        value_parser = humantime::parse_duration
    )]
    pub polling_interval: Duration,

    /// Give verbose output while running
    #[arg(short = 'v', long = "verbose", env = "VERBOSE")]
    pub verbose: bool,

    /// Docker repositories to operate on,
    /// e.g.: alpine nginx~/1\.13\.5$/ busybox~/1.27.2/
    #[arg(value_name = "REPO1 REPO2 REPOn")]
    pub repositories: Vec<String>,
}

impl Options {
    /// Cross-flag validation and the implications between flags
    pub fn postprocess(&mut self) -> Result<()> {
        if self.repositories.is_empty() && self.yaml_config.is_none() {
            return Err(LstagsError::Config(
                r"need at least one repository name, e.g. 'nginx~/^1\.13/' or 'mesosphere/chronos'"
                    .to_string(),
            ));
        }

        if !self.repositories.is_empty() && self.yaml_config.is_some() {
            return Err(LstagsError::Config(
                "load repositories from YAML or from CLI args, not from both at the same time"
                    .to_string(),
            ));
        }

        if matches!(&self.push_registry, Some(registry) if !registry.is_empty()) {
            self.push = true;
        }

        if self.pull && self.push {
            return Err(LstagsError::Config(
                "you either '--pull' or '--push', not both".to_string(),
            ));
        }

        if self.daemon_mode {
            self.do_not_fail = true;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(args: &[&str]) -> Options {
        let mut argv = vec!["lstags"];
        argv.extend_from_slice(args);

        Options::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let o = options(&["alpine"]);

        assert_eq!(o.docker_json, "~/.docker/config.json");
        assert_eq!(o.concurrent_requests, 16);
        assert_eq!(o.retry_requests, 2);
        assert_eq!(o.retry_delay, Duration::from_secs(2));
        assert_eq!(o.polling_interval, Duration::from_secs(60));
        assert_eq!(o.push_path_template, "{{ .Prefix }}{{ .Path }}");
        assert_eq!(o.push_tag_template, "{{ .Tag }}");
        assert_eq!(o.path_separator, "/");
        assert!(!o.pull);
        assert!(!o.push);
    }

    #[test]
    fn test_duration_flags_parse_human_form() {
        let o = options(&["-w", "500ms", "-D", "10s", "-i", "5m", "alpine"]);

        assert_eq!(o.wait_between, Duration::from_millis(500));
        assert_eq!(o.retry_delay, Duration::from_secs(10));
        assert_eq!(o.polling_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_no_repositories_and_no_yaml_is_error() {
        let mut o = options(&[]);
        assert!(o.postprocess().is_err());
    }

    #[test]
    fn test_repositories_and_yaml_are_exclusive() {
        let mut o = options(&["-f", "lstags.yml", "alpine"]);
        assert!(o.postprocess().is_err());
    }

    #[test]
    fn test_yaml_alone_is_fine() {
        let mut o = options(&["-f", "lstags.yml"]);
        assert!(o.postprocess().is_ok());
    }

    #[test]
    fn test_push_registry_implies_push() {
        let mut o = options(&["-r", "registry.mirror.io", "alpine"]);
        o.postprocess().unwrap();
        assert!(o.push);
    }

    #[test]
    fn test_pull_and_push_are_exclusive() {
        let mut o = options(&["--pull", "--push", "alpine"]);
        assert!(o.postprocess().is_err());
    }

    #[test]
    fn test_daemon_mode_implies_do_not_fail() {
        let mut o = options(&["-d", "alpine"]);
        o.postprocess().unwrap();
        assert!(o.do_not_fail);
    }
}
