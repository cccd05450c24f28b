//! Collection of repositories and their joined tags
//!
//! The result shape the orchestrator hands back to callers: an ordered
//! list of references with the parsed repository and the ordered tag list
//! behind each of them.

use std::collections::HashMap;

use crate::error::{LstagsError, Result};
use crate::repository::Repository;
use crate::tag::Tag;

/// Repositories and tags collected from a registry or Docker daemon query
#[derive(Debug, Clone)]
pub struct Collection {
    refs: Vec<String>,
    repos: HashMap<String, Repository>,
    tags: HashMap<String, Vec<Tag>>,
}

impl Collection {
    /// Builds a collection, validating that references and the tag map
    /// correspond to each other in both directions.
    pub fn new(repos: Vec<Repository>, tags: HashMap<String, Vec<Tag>>) -> Result<Self> {
        let refs: Vec<String> = repos.iter().map(|r| r.ref_str().to_string()).collect();

        for reference in &refs {
            if !tags.contains_key(reference) {
                return Err(LstagsError::Reference(format!(
                    "repository reference has no tags: {}",
                    reference
                )));
            }
        }

        for reference in tags.keys() {
            if !refs.contains(reference) {
                return Err(LstagsError::Reference(format!(
                    "repository has tags, but is not referenced: {}",
                    reference
                )));
            }
        }

        let repos = repos
            .into_iter()
            .map(|r| (r.ref_str().to_string(), r))
            .collect();

        Ok(Self { refs, repos, tags })
    }

    /// All repository references, in input order
    pub fn refs(&self) -> &[String] {
        &self.refs
    }

    /// All repositories, in input order
    pub fn repos(&self) -> Vec<&Repository> {
        self.refs
            .iter()
            .filter_map(|reference| self.repos.get(reference))
            .collect()
    }

    pub fn repo(&self, reference: &str) -> Option<&Repository> {
        self.repos.get(reference)
    }

    pub fn tags(&self, reference: &str) -> Option<&[Tag]> {
        self.tags.get(reference).map(|tags| tags.as_slice())
    }

    /// Tags of one reference, keyed by tag name
    pub fn tag_map(&self, reference: &str) -> HashMap<String, Tag> {
        let mut tag_map = HashMap::new();

        if let Some(tags) = self.tags.get(reference) {
            for tag in tags {
                tag_map.insert(tag.name().to_string(), tag.clone());
            }
        }

        tag_map
    }

    pub fn repo_count(&self) -> usize {
        self.refs.len()
    }

    pub fn tag_count(&self) -> usize {
        self.tags.values().map(|tags| tags.len()).sum()
    }

    /// Flat list of `NAME:TAG` references for every tag in the collection
    pub fn tagged_refs(&self) -> Vec<String> {
        let mut tagged = Vec::new();

        for reference in &self.refs {
            let repo = match self.repos.get(reference) {
                Some(repo) => repo,
                None => continue,
            };

            if let Some(tags) = self.tags.get(reference) {
                for tag in tags {
                    tagged.push(format!("{}:{}", repo.name(), tag.name()));
                }
            }
        }

        tagged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RefParser;
    use crate::tag::TagOptions;

    fn make_tag(name: &str) -> Tag {
        Tag::new(
            name,
            TagOptions {
                digest: format!("sha256:{}", name),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn fixture() -> Collection {
        let parser = RefParser::default();
        let repos = parser
            .parse_refs(&["alpine:3.7".to_string(), "busybox".to_string()])
            .unwrap();

        let mut tags = HashMap::new();
        tags.insert("alpine:3.7".to_string(), vec![make_tag("3.7")]);
        tags.insert(
            "busybox".to_string(),
            vec![make_tag("1.27.2"), make_tag("latest")],
        );

        Collection::new(repos, tags).unwrap()
    }

    #[test]
    fn test_refs_keep_input_order() {
        let collection = fixture();
        assert_eq!(collection.refs(), ["alpine:3.7", "busybox"]);

        let repo_refs: Vec<&str> = collection.repos().iter().map(|r| r.ref_str()).collect();
        assert_eq!(repo_refs, ["alpine:3.7", "busybox"]);
    }

    #[test]
    fn test_counts() {
        let collection = fixture();
        assert_eq!(collection.repo_count(), 2);
        assert_eq!(collection.tag_count(), 3);
    }

    #[test]
    fn test_accessors() {
        let collection = fixture();

        assert!(collection.repo("alpine:3.7").is_some());
        assert!(collection.repo("unknown").is_none());

        assert_eq!(collection.tags("busybox").unwrap().len(), 2);
        assert!(collection.tags("unknown").is_none());

        let tag_map = collection.tag_map("busybox");
        assert!(tag_map.contains_key("latest"));
        assert!(tag_map.contains_key("1.27.2"));
    }

    #[test]
    fn test_tagged_refs() {
        let collection = fixture();
        assert_eq!(
            collection.tagged_refs(),
            ["alpine:3.7", "busybox:1.27.2", "busybox:latest"]
        );
    }

    #[test]
    fn test_ref_without_tags_is_rejected() {
        let parser = RefParser::default();
        let repos = parser.parse_refs(&["alpine".to_string()]).unwrap();

        assert!(Collection::new(repos, HashMap::new()).is_err());
    }

    #[test]
    fn test_tags_without_ref_are_rejected() {
        let parser = RefParser::default();
        let repos = parser.parse_refs(&["alpine".to_string()]).unwrap();

        let mut tags = HashMap::new();
        tags.insert("alpine".to_string(), vec![]);
        tags.insert("stray".to_string(), vec![]);

        assert!(Collection::new(repos, tags).is_err());
    }

    #[test]
    fn test_empty_tag_list_is_fine() {
        let parser = RefParser::default();
        let repos = parser.parse_refs(&["alpine".to_string()]).unwrap();

        let mut tags = HashMap::new();
        tags.insert("alpine".to_string(), vec![]);

        let collection = Collection::new(repos, tags).unwrap();
        assert_eq!(collection.tag_count(), 0);
    }
}
