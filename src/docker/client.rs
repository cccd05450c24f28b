//! bollard-backed implementation of the daemon adapter
//!
//! Talks to the local Docker daemon over its default socket and injects
//! per-registry credentials resolved through [`DockerConfig`]; bollard
//! turns them into the `X-Registry-Auth` header the daemon expects.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{Config as ContainerConfig, CreateContainerOptions, StartContainerOptions};
use bollard::image::{
    CreateImageOptions, ListImagesOptions, PushImageOptions, RemoveImageOptions, TagImageOptions,
};
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures::TryStreamExt;

use crate::docker::config::DockerConfig;
use crate::docker::{DockerDaemon, ImageSummary};
use crate::error::{LstagsError, Result};
use crate::repository::RefParser;

/// Default delay between retries of failed pulls
const PULL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Daemon adapter backed by bollard
pub struct DockerClient {
    docker: Docker,
    config: Arc<DockerConfig>,
    parser: RefParser,
    retry_pulls: u32,
}

impl DockerClient {
    pub fn new(config: Arc<DockerConfig>, parser: RefParser, retry_pulls: u32) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;

        Ok(Self {
            docker,
            config,
            parser,
            retry_pulls,
        })
    }

    fn credentials_for(&self, reference: &str) -> Option<DockerCredentials> {
        let registry = self.parser.registry_of(reference);
        let (username, password) = self.config.get_credentials(&registry)?;

        Some(DockerCredentials {
            username: Some(username),
            password: Some(password),
            ..Default::default()
        })
    }
}

/// Splits `repo[:tag]` at the tag separator; a colon inside the registry
/// port is not a tag separator.
fn split_tag(reference: &str) -> (&str, &str) {
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (reference, "latest"),
    }
}

fn parse_port_specs(
    port_specs: &[String],
) -> Result<(HashMap<String, HashMap<(), ()>>, HashMap<String, Option<Vec<PortBinding>>>)> {
    let mut exposed_ports = HashMap::new();
    let mut port_bindings = HashMap::new();

    for spec in port_specs {
        let (host_port, container_port) = spec.split_once(':').ok_or_else(|| {
            LstagsError::Docker(format!("bad port specification '{}': expected HOST:CONTAINER", spec))
        })?;

        let container_key = format!("{}/tcp", container_port);

        exposed_ports.insert(container_key.clone(), HashMap::new());
        port_bindings.insert(
            container_key,
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(host_port.to_string()),
            }]),
        );
    }

    Ok((exposed_ports, port_bindings))
}

#[async_trait]
impl DockerDaemon for DockerClient {
    async fn list_images_for_repo(&self, repo: &str) -> Result<Vec<ImageSummary>> {
        let mut filters = HashMap::new();
        filters.insert("reference".to_string(), vec![repo.to_string()]);

        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                filters,
                ..Default::default()
            }))
            .await?;

        Ok(images
            .into_iter()
            .map(|image| ImageSummary {
                id: image.id,
                repo_digests: image.repo_digests,
                repo_tags: image.repo_tags,
                created: image.created,
            })
            .collect())
    }

    async fn pull(&self, reference: &str) -> Result<()> {
        let credentials = self.credentials_for(reference);
        let options = CreateImageOptions::<String> {
            from_image: reference.to_string(),
            ..Default::default()
        };

        let tries = 1 + self.retry_pulls;
        let mut delay = PULL_RETRY_DELAY;

        let mut attempt = 1;
        loop {
            let pull = self
                .docker
                .create_image(Some(options.clone()), None, credentials.clone())
                .try_collect::<Vec<_>>()
                .await;

            match pull {
                Ok(_) => return Ok(()),
                Err(err) => {
                    if attempt >= tries {
                        return Err(err.into());
                    }

                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }

    async fn tag(&self, src: &str, dst: &str) -> Result<()> {
        let (repo, tag) = split_tag(dst);

        self.docker
            .tag_image(
                src,
                Some(TagImageOptions {
                    repo: repo.to_string(),
                    tag: tag.to_string(),
                }),
            )
            .await?;

        Ok(())
    }

    async fn push(&self, reference: &str) -> Result<()> {
        let credentials = self.credentials_for(reference);
        let (repo, tag) = split_tag(reference);

        self.docker
            .push_image(
                repo,
                Some(PushImageOptions::<String> {
                    tag: tag.to_string(),
                }),
                credentials,
            )
            .try_collect::<Vec<_>>()
            .await?;

        Ok(())
    }

    async fn force_remove(&self, id: &str) -> Result<()> {
        self.docker
            .remove_image(
                id,
                Some(RemoveImageOptions {
                    force: true,
                    ..Default::default()
                }),
                None,
            )
            .await?;

        Ok(())
    }

    async fn run(&self, reference: &str, name: &str, port_specs: &[String]) -> Result<String> {
        let (exposed_ports, port_bindings) = parse_port_specs(port_specs)?;

        self.pull(reference).await?;

        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.to_string(),
                    platform: None,
                }),
                ContainerConfig {
                    image: Some(reference.to_string()),
                    exposed_ports: Some(exposed_ports),
                    host_config: Some(HostConfig {
                        port_bindings: Some(port_bindings),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await?;

        self.docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await?;

        Ok(container.id)
    }
}
