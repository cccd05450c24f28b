//! Repository reference parsing and matching
//!
//! Handles parsing and validation of repository references passed in text
//! form, e.g. `registry.example.com:5000/team/app~/^v1\./`, and associates
//! the repository with the tag names or filter it should match.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{LstagsError, Result};

/// Description of a valid repository reference
pub const REF_SPEC: &str = "[REGISTRY[:PORT]/]REPOSITORY[:TAG|=TAG1,TAG2,TAGn|~/FILTER_REGEXP/]";

/// Expression matching insecure (plain HTTP) registry hostnames
pub const DEFAULT_INSECURE_REGISTRY_EX: &str = r"^(127\..*|::1|localhost)(:[0-9]+)?$";

/// Registry used when the reference carries no hostname
pub const DEFAULT_REGISTRY: &str = "registry.hub.docker.com";

const REGISTRY_EX: &str = r"[a-z0-9][a-z0-9\-\.]+[a-z0-9](:[0-9]+)?/";
const REPO_PATH_EX: &str = r"[a-z0-9_][a-z0-9_\-\.\/]+[a-z0-9_]";
const TAG_EX: &str = r"[a-zA-Z0-9_\-\.]+";
const FILTER_EX: &str = r"/.*/";

static REF_WITH_NOTHING: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^({})?{}$", REGISTRY_EX, REPO_PATH_EX)).unwrap());
static REF_WITH_SINGLE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^({})?{}:{}$", REGISTRY_EX, REPO_PATH_EX, TAG_EX)).unwrap());
static REF_WITH_MANY_TAGS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        "^({})?{}={}(,{})*$",
        REGISTRY_EX, REPO_PATH_EX, TAG_EX, TAG_EX
    ))
    .unwrap()
});
static REF_WITH_FILTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^({})?{}~{}$", REGISTRY_EX, REPO_PATH_EX, FILTER_EX)).unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefForm {
    Nothing,
    SingleTag,
    ManyTags,
    Filter,
}

fn validate_ref(reference: &str) -> Result<RefForm> {
    if REF_WITH_NOTHING.is_match(reference) {
        return Ok(RefForm::Nothing);
    }
    if REF_WITH_SINGLE_TAG.is_match(reference) {
        return Ok(RefForm::SingleTag);
    }
    if REF_WITH_MANY_TAGS.is_match(reference) {
        return Ok(RefForm::ManyTags);
    }
    if REF_WITH_FILTER.is_match(reference) {
        return Ok(RefForm::Filter);
    }

    Err(LstagsError::Reference(format!(
        "repository reference '{}' failed to match specification: {}",
        reference, REF_SPEC
    )))
}

fn is_hostname(s: &str) -> bool {
    s.contains('.') || s.contains(':') || s == "localhost"
}

/// Parses repository references with a configurable insecure-registry
/// expression and default registry. One parser instance is configured per
/// run; independent instances can be constructed freely in tests.
#[derive(Debug, Clone)]
pub struct RefParser {
    insecure_re: Regex,
    default_registry: String,
}

impl RefParser {
    pub fn new(insecure_ex: Option<&str>, default_registry: Option<&str>) -> Result<Self> {
        let expression = insecure_ex.unwrap_or(DEFAULT_INSECURE_REGISTRY_EX);
        let insecure_re = Regex::new(expression).map_err(|e| {
            LstagsError::Config(format!("bad insecure registry expression '{}': {}", expression, e))
        })?;

        Ok(Self {
            insecure_re,
            default_registry: default_registry.unwrap_or(DEFAULT_REGISTRY).to_string(),
        })
    }

    /// Extracts the registry address from a repository reference: the
    /// leading path segment is a registry iff it looks like a hostname.
    pub fn registry_of(&self, reference: &str) -> String {
        let reference = reference.split('~').next().unwrap_or(reference);

        if !reference.contains('/') {
            return self.default_registry.clone();
        }

        let registry = reference.split('/').next().unwrap_or("");

        if is_hostname(registry) {
            return registry.to_string();
        }

        self.default_registry.clone()
    }

    /// Transforms a textual repository reference into a [`Repository`].
    pub fn parse_ref(&self, reference: &str) -> Result<Repository> {
        let form = validate_ref(reference)?;

        let registry = self.registry_of(reference);

        let full_ref = if reference.starts_with(&registry) {
            reference.to_string()
        } else {
            format!("{}/{}", registry, reference)
        };

        let mut repo_tags: Vec<String> = Vec::new();
        let mut filter_re: Option<Regex> = None;
        let mut is_single = false;

        let full_repo = match form {
            RefForm::Nothing => {
                filter_re = Some(Regex::new(".*").unwrap());
                full_ref
            }
            RefForm::SingleTag => {
                let (repo, tag) = full_ref
                    .rsplit_once(':')
                    .ok_or_else(|| LstagsError::Reference(format!("no tag in: {}", full_ref)))?;
                repo_tags = vec![tag.to_string()];
                is_single = true;
                repo.to_string()
            }
            RefForm::ManyTags => {
                let (repo, tags) = full_ref
                    .split_once('=')
                    .ok_or_else(|| LstagsError::Reference(format!("no tags in: {}", full_ref)))?;
                repo_tags = tags.split(',').map(|t| t.to_string()).collect();
                is_single = true;
                repo.to_string()
            }
            RefForm::Filter => {
                let (repo, filter) = full_ref
                    .split_once('~')
                    .ok_or_else(|| LstagsError::Reference(format!("no filter in: {}", full_ref)))?;
                let inner = &filter[1..filter.len() - 1];
                filter_re = Some(Regex::new(inner).map_err(|e| {
                    LstagsError::Reference(format!("bad filter regexp '{}': {}", inner, e))
                })?);
                repo.to_string()
            }
        };

        Ok(Repository {
            reference: reference.to_string(),
            registry: registry.clone(),
            full_repo,
            repo_tags,
            filter_re,
            is_secure: !self.insecure_re.is_match(&registry),
            is_single,
            default_registry: self.default_registry.clone(),
        })
    }

    /// Parses multiple references, failing on the first bad one.
    pub fn parse_refs(&self, references: &[String]) -> Result<Vec<Repository>> {
        references.iter().map(|r| self.parse_ref(r)).collect()
    }
}

impl Default for RefParser {
    fn default() -> Self {
        Self::new(None, None).unwrap()
    }
}

/// A parsed, valid repository reference. Immutable after construction.
#[derive(Debug, Clone)]
pub struct Repository {
    reference: String,
    registry: String,
    full_repo: String,
    repo_tags: Vec<String>,
    filter_re: Option<Regex>,
    is_secure: bool,
    is_single: bool,
    default_registry: String,
}

impl Repository {
    /// Original reference string the repository was parsed from
    pub fn ref_str(&self) -> &str {
        &self.reference
    }

    /// Registry ADDR[:PORT]
    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn is_default_registry(&self) -> bool {
        self.registry == self.default_registry
    }

    /// Repository in "full" form: REGISTRY[:PORT]/REPOSITORY
    pub fn full(&self) -> &str {
        &self.full_repo
    }

    /// Like [`Repository::full`], but cuts the leading registry when the
    /// default registry is in use (matches what the Docker daemon shows).
    pub fn name(&self) -> String {
        if self.is_default_registry() {
            return self
                .full_repo
                .splitn(2, '/')
                .nth(1)
                .unwrap_or_default()
                .to_string();
        }

        self.full_repo.clone()
    }

    /// Repository path without the registry hostname, e.g. "library/alpine"
    pub fn path(&self) -> String {
        let path = self
            .full_repo
            .splitn(2, '/')
            .nth(1)
            .unwrap_or_default()
            .to_string();

        if self.is_default_registry() && !path.contains('/') {
            return format!("library/{}", path);
        }

        path
    }

    /// Repository path with a custom path element separator
    pub fn push_path(&self, path_separator: &str) -> String {
        self.path().split('/').collect::<Vec<_>>().join(path_separator)
    }

    /// Prefix path for this repository in a "push" registry:
    /// the registry hostname (port stripped) with dots turned into slashes
    pub fn push_prefix(&self) -> String {
        let host = self.registry.split(':').next().unwrap_or(&self.registry);

        format!("/{}/", host.replace('.', "/"))
    }

    /// True if concrete tag names were specified for this repository
    pub fn has_tags(&self) -> bool {
        !self.repo_tags.is_empty()
    }

    pub fn tags(&self) -> &[String] {
        &self.repo_tags
    }

    /// True if a /FILTER/ regexp was specified (or implied) for this repository
    pub fn has_filter(&self) -> bool {
        self.filter_re.is_some()
    }

    pub fn filter(&self) -> String {
        self.filter_re
            .as_ref()
            .map(|re| re.as_str().to_string())
            .unwrap_or_default()
    }

    /// True if we talk to this registry over HTTPS
    pub fn is_secure(&self) -> bool {
        self.is_secure
    }

    pub fn web_schema(&self) -> &'static str {
        if self.is_secure {
            "https://"
        } else {
            "http://"
        }
    }

    /// True if the reference specified exactly one tag via the `:TAG` form
    /// (or an explicit `=TAG` list)
    pub fn is_single(&self) -> bool {
        self.is_single
    }

    /// Matches a tag name against the tag list or filter specification
    pub fn match_tag(&self, tag: &str) -> bool {
        self.is_tag_specified(tag) || self.tag_matches_filter(tag)
    }

    fn is_tag_specified(&self, tag: &str) -> bool {
        if self.has_filter() {
            return false;
        }

        self.repo_tags.iter().any(|t| t == tag)
    }

    fn tag_matches_filter(&self, tag: &str) -> bool {
        match &self.filter_re {
            Some(re) => re.is_match(tag),
            None => false,
        }
    }
}
