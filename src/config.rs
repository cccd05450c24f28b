//! YAML repositories file
//!
//! A document rooted at `lstags:` holding the repository references to
//! operate on, as an alternative to positional CLI arguments.

use serde::Deserialize;

use crate::error::{LstagsError, Result};
use crate::util::fix_path;

/// Repository list loadable from a YAML file
#[derive(Debug, Clone, Deserialize)]
pub struct YamlConfig {
    pub repositories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct YamlDocument {
    lstags: Option<YamlConfig>,
}

/// Loads the YAML repositories file. A missing or empty repositories
/// list is an error: there would be nothing to do.
pub fn load_yaml_file(path: &str) -> Result<YamlConfig> {
    let data = std::fs::read_to_string(fix_path(path)).map_err(|err| {
        LstagsError::Config(format!("could not read YAML config '{}': {}", path, err))
    })?;

    let document: YamlDocument = serde_yaml::from_str(&data)?;

    match document.lstags {
        Some(config) if !config.repositories.is_empty() => Ok(config),
        _ => Err(LstagsError::Config(format!(
            "no repositories could be loaded from: {}",
            path
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_yaml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_repositories() {
        let file = write_yaml(
            "lstags:\n  repositories:\n    - alpine:3.7\n    - busybox~/^1\\.27/\n",
        );

        let config = load_yaml_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.repositories, ["alpine:3.7", "busybox~/^1\\.27/"]);
    }

    #[test]
    fn test_missing_repositories_is_error() {
        let file = write_yaml("lstags: {}\n");
        assert!(load_yaml_file(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_empty_repositories_is_error() {
        let file = write_yaml("lstags:\n  repositories: []\n");
        assert!(load_yaml_file(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_wrong_root_is_error() {
        let file = write_yaml("something_else:\n  repositories: [alpine]\n");
        assert!(load_yaml_file(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(load_yaml_file("/nonexistent/lstags.yml").is_err());
    }
}
