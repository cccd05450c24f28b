//! Docker JSON configuration and credential resolution
//!
//! Loads the Docker-style `config.json` and resolves per-registry
//! credentials from its decoded `auths` entries, per-registry credential
//! helpers or the default credential store, in that order.

use std::collections::HashMap;
use std::io::Write;
use std::process::{Command, Stdio};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;

use crate::error::{LstagsError, Result};
use crate::util::fix_path;

/// Default path of the Docker JSON config file
pub const DEFAULT_DOCKER_JSON: &str = "~/.docker/config.json";

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawDockerConfig {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    #[serde(default, rename = "credsStore")]
    creds_store: String,
    #[serde(default, rename = "credHelpers")]
    cred_helpers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct HelperCredentials {
    #[serde(rename = "Username")]
    username: String,
    #[serde(rename = "Secret")]
    secret: String,
}

/// Credentials loaded from a Docker `config.json` file
#[derive(Debug, Default)]
pub struct DockerConfig {
    usernames: HashMap<String, String>,
    passwords: HashMap<String, String>,
    creds_store: String,
    cred_helpers: HashMap<String, String>,
}

impl DockerConfig {
    /// Loads configuration from the JSON file specified. A missing file
    /// at the default path yields an empty configuration; a missing or
    /// broken file anywhere else is an error.
    pub fn load(file_name: &str) -> Result<Self> {
        Self::load_internal(file_name, file_name == DEFAULT_DOCKER_JSON)
    }

    fn load_internal(file_name: &str, is_default: bool) -> Result<Self> {
        let data = match std::fs::read_to_string(fix_path(file_name)) {
            Ok(data) => data,
            Err(_) if is_default => return Ok(Self::default()),
            Err(err) => {
                return Err(LstagsError::Config(format!(
                    "could not read Docker config '{}': {}",
                    file_name, err
                )))
            }
        };

        let raw: RawDockerConfig = serde_json::from_str(&data).map_err(|err| {
            LstagsError::Config(format!(
                "could not parse Docker config '{}': {}",
                file_name, err
            ))
        })?;

        let mut config = Self {
            creds_store: raw.creds_store,
            cred_helpers: raw.cred_helpers,
            ..Self::default()
        };

        for (registry, entry) in raw.auths {
            let decoded = BASE64.decode(&entry.auth).map_err(|err| {
                LstagsError::Config(format!(
                    "invalid auth for Docker registry '{}': bad base64 '{}': {}",
                    registry, entry.auth, err
                ))
            })?;
            let token = String::from_utf8_lossy(&decoded).to_string();

            // An empty auth string is not broken, it means "ask a helper"
            if token.is_empty() {
                continue;
            }

            match token.split_once(':') {
                Some((username, password)) => {
                    config
                        .usernames
                        .insert(registry.clone(), username.to_string());
                    config.passwords.insert(registry, password.to_string());
                }
                None if is_default => continue,
                None => {
                    return Err(LstagsError::Config(format!(
                        "invalid auth for Docker registry '{}': base64-encoded string is wrong: {}",
                        registry, entry.auth
                    )))
                }
            }
        }

        Ok(config)
    }

    /// True if the configuration carries no credential source at all
    pub fn is_empty(&self) -> bool {
        self.usernames.is_empty() && self.creds_store.is_empty() && self.cred_helpers.is_empty()
    }

    /// Resolves credentials for a registry: decoded config entries win,
    /// then the registry's credential helper, then the default store.
    pub fn get_credentials(&self, registry: &str) -> Option<(String, String)> {
        if let (Some(username), Some(password)) =
            (self.usernames.get(registry), self.passwords.get(registry))
        {
            return Some((username.clone(), password.clone()));
        }

        if let Some(helper) = self.cred_helpers.get(registry) {
            match run_credential_helper(registry, helper) {
                Ok(credentials) => return Some(credentials),
                Err(err) => eprintln!("[credhelper][credHelpers] Error: {}", err),
            }
        }

        if !self.creds_store.is_empty() {
            match run_credential_helper(registry, &self.creds_store) {
                Ok(credentials) => return Some(credentials),
                Err(err) => eprintln!("[credhelper][credsStore] Error: {}", err),
            }
        }

        None
    }

    /// Per-registry authentication payload for the Docker daemon: base64
    /// of a JSON username/password document (the `X-Registry-Auth` value)
    pub fn get_registry_auth(&self, registry: &str) -> Option<String> {
        let (username, password) = self.get_credentials(registry)?;

        let payload = serde_json::json!({
            "username": username,
            "password": password,
        });

        Some(BASE64.encode(payload.to_string()))
    }
}

/// Asks an external `docker-credential-<name>` helper process for the
/// registry's credentials: the registry goes to its stdin, JSON with
/// `Username`/`Secret` comes back on stdout.
fn run_credential_helper(registry: &str, helper: &str) -> Result<(String, String)> {
    let mut child = Command::new(format!("docker-credential-{}", helper))
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    if let Some(stdin) = child.stdin.as_mut() {
        stdin.write_all(registry.as_bytes())?;
    }

    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(LstagsError::Config(format!(
            "credential helper '{}' failed for registry '{}'",
            helper, registry
        )));
    }

    let credentials: HelperCredentials = serde_json::from_slice(&output.stdout)?;

    Ok((credentials.username, credentials.secret))
}
