//! Local Docker daemon integration
//!
//! The orchestrator only consumes the [`DockerDaemon`] trait, so tests can
//! run against an in-memory fake while [`client::DockerClient`] talks to a
//! real daemon through bollard.

pub mod client;
pub mod config;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::registry::client::NO_DIGEST_SENTINEL;
use crate::repository::Repository;
use crate::tag::{Tag, TagOptions};

pub use client::DockerClient;
pub use config::DockerConfig;

/// Subset of the daemon's image listing the tag join consumes
#[derive(Debug, Clone, Default)]
pub struct ImageSummary {
    pub id: String,
    pub repo_digests: Vec<String>,
    pub repo_tags: Vec<String>,
    pub created: i64,
}

/// Operations the application needs from a local Docker daemon
#[async_trait]
pub trait DockerDaemon: Send + Sync {
    /// Lists images present locally for the repository name specified
    async fn list_images_for_repo(&self, repo: &str) -> Result<Vec<ImageSummary>>;

    /// Pulls the image reference specified (like `docker pull`)
    async fn pull(&self, reference: &str) -> Result<()>;

    /// Puts the `dst` tag on the `src` image (like `docker tag`)
    async fn tag(&self, src: &str, dst: &str) -> Result<()>;

    /// Pushes the image reference specified (like `docker push`)
    async fn push(&self, reference: &str) -> Result<()>;

    /// Kills and removes the container specified (like `docker rm -f`)
    async fn force_remove(&self, id: &str) -> Result<()>;

    /// Runs a container from the image specified (like `docker run`),
    /// returning the container id
    async fn run(&self, reference: &str, name: &str, port_specs: &[String]) -> Result<String>;
}

fn extract_repo_digest(repo_digests: &[String]) -> String {
    let digest = repo_digests
        .first()
        .and_then(|d| d.split_once('@'))
        .map(|(_, digest)| digest.to_string())
        .unwrap_or_default();

    if digest.is_empty() {
        return NO_DIGEST_SENTINEL.to_string();
    }

    digest
}

fn extract_tag_names(repo_tags: &[String], repo_name: &str) -> Vec<String> {
    repo_tags
        .iter()
        .filter_map(|repo_tag| {
            repo_tag
                .strip_prefix(&format!("{}:", repo_name))
                .map(|tag| tag.to_string())
        })
        .collect()
}

/// Looks up tags and image ids the local daemon has for the repository,
/// filtered through the repository's tag/filter specification.
pub async fn fetch_tags_local(
    daemon: &dyn DockerDaemon,
    repo: &Repository,
) -> Result<HashMap<String, Tag>> {
    let summaries = daemon.list_images_for_repo(&repo.name()).await?;

    let mut tags: HashMap<String, Tag> = HashMap::new();

    for summary in summaries {
        let repo_digest = extract_repo_digest(&summary.repo_digests);

        for tag_name in extract_tag_names(&summary.repo_tags, &repo.name()) {
            if !repo.match_tag(&tag_name) {
                continue;
            }

            let tag = Tag::new(
                &tag_name,
                TagOptions {
                    digest: repo_digest.clone(),
                    image_id: summary.id.clone(),
                    created: summary.created,
                },
            )?;

            tags.insert(tag_name, tag);
        }
    }

    Ok(tags)
}
