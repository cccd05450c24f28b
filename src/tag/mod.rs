//! Tag model and the remote/local/assumed set join
//!
//! A [`Tag`] aggregates tag-related information (name, content digest,
//! local image id, creation time) and the state it ends up in after the
//! remote and local tag sets are joined.

pub mod manifest;

use std::collections::HashMap;

use chrono::{Local, TimeZone};

use crate::error::{LstagsError, Result};

/// Digest/image-id placeholder for tags we know nothing concrete about
pub const NOT_AVAILABLE: &str = "n/a";

/// Difference between a tag's remote and local counterparts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagState {
    /// Present remotely and locally with an equal digest
    Present,
    /// Present remotely, missing locally
    Absent,
    /// Present on both sides with differing digests
    Changed,
    /// Present locally only
    LocalOnly,
    /// Missing on both sides, but asserted by the caller to exist
    Assumed,
}

impl TagState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagState::Present => "PRESENT",
            TagState::Absent => "ABSENT",
            TagState::Changed => "CHANGED",
            TagState::LocalOnly => "LOCAL-ONLY",
            TagState::Assumed => "ASSUMED",
        }
    }
}

impl std::fmt::Display for TagState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional parameters for [`Tag::new`]
#[derive(Debug, Clone, Default)]
pub struct TagOptions {
    pub digest: String,
    pub image_id: String,
    pub created: i64,
}

/// Tag name, image digest, local image id and creation time of one tag
#[derive(Debug, Clone)]
pub struct Tag {
    name: String,
    digest: String,
    image_id: String,
    created: i64,
    state: Option<TagState>,
}

fn cut_image_id(s: &str) -> String {
    let id = match s.split_once(':') {
        Some((_, rest)) => rest,
        None => s,
    };

    id.chars().take(12).collect()
}

impl Tag {
    pub fn new(name: &str, options: TagOptions) -> Result<Self> {
        if name.is_empty() {
            return Err(LstagsError::Tag("empty tag name not allowed".to_string()));
        }

        if options.digest.is_empty() {
            return Err(LstagsError::Tag("empty image digest not allowed".to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            digest: options.digest,
            image_id: cut_image_id(&options.image_id),
            created: options.created,
            state: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Shorter form of the image digest used for display
    pub fn short_digest(&self) -> &str {
        const LIMIT: usize = 40;

        if self.digest.len() < LIMIT {
            return &self.digest;
        }

        &self.digest[0..LIMIT]
    }

    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    pub fn has_image_id(&self) -> bool {
        !self.image_id.is_empty()
    }

    fn set_image_id(&mut self, s: &str) {
        self.image_id = cut_image_id(s);
    }

    pub fn state(&self) -> Option<TagState> {
        self.state
    }

    /// State label used in the rendered table
    pub fn state_label(&self) -> &'static str {
        match self.state {
            Some(state) => state.as_str(),
            None => "UNKNOWN",
        }
    }

    pub fn created(&self) -> i64 {
        self.created
    }

    /// Creation timestamp in textual form, embedded into the sort key so
    /// ordering stays stable across processes
    pub fn created_key(&self) -> String {
        self.created.to_string()
    }

    /// Creation time for display: RFC3339 in local time, offset stripped
    pub fn created_string(&self) -> String {
        match Local.timestamp_opt(self.created, 0).single() {
            Some(t) => t.format("%Y-%m-%dT%H:%M:%S").to_string(),
            None => String::new(),
        }
    }

    /// Sort key: textual creation timestamp with the name as a tiebreak
    pub fn sort_key(&self) -> String {
        self.created_key() + &self.name
    }

    /// True if this tag should be pulled from the remote registry
    pub fn needs_pull(&self) -> bool {
        matches!(
            self.state,
            Some(TagState::Absent) | Some(TagState::Changed) | Some(TagState::Assumed)
        )
    }

    /// True if this tag should be [re-]pushed to the "push" registry
    pub fn needs_push(&self, update_changed: bool) -> bool {
        match self.state {
            Some(TagState::Absent) | Some(TagState::Assumed) => true,
            Some(TagState::Changed) => update_changed,
            _ => false,
        }
    }
}

fn calculate_state(
    name: &str,
    remote_tags: &HashMap<String, Tag>,
    local_tags: &HashMap<String, Tag>,
) -> TagState {
    match (remote_tags.get(name), local_tags.get(name)) {
        (Some(_), None) => TagState::Absent,
        (None, Some(_)) => TagState::LocalOnly,
        (Some(r), Some(l)) => {
            if r.digest() == l.digest() {
                TagState::Present
            } else {
                TagState::Changed
            }
        }
        (None, None) => TagState::Assumed,
    }
}

/// Joins remote tags with local ones, assigns per-tag states and returns:
/// * a sorted list of sort keys
/// * a map of sort key to tag name
/// * a map of tag name to the joined [`Tag`]
pub fn join(
    remote_tags: &HashMap<String, Tag>,
    local_tags: &HashMap<String, Tag>,
    assumed_tag_names: &[String],
) -> (Vec<String>, HashMap<String, String>, HashMap<String, Tag>) {
    let mut sorted_keys: Vec<String> = Vec::new();
    let mut tag_names: HashMap<String, String> = HashMap::new();
    let mut joined_tags: HashMap<String, Tag> = HashMap::new();

    for (name, rtg) in remote_tags {
        let sort_key = rtg.sort_key();

        sorted_keys.push(sort_key.clone());
        tag_names.insert(sort_key, name.clone());

        let mut joined = rtg.clone();
        match local_tags.get(name) {
            Some(ltg) if ltg.has_image_id() => joined.set_image_id(ltg.image_id()),
            _ => joined.set_image_id(NOT_AVAILABLE),
        }

        joined_tags.insert(name.clone(), joined);
    }

    for (name, ltg) in local_tags {
        if remote_tags.contains_key(name) {
            continue;
        }

        let sort_key = ltg.sort_key();

        sorted_keys.push(sort_key.clone());
        tag_names.insert(sort_key, name.clone());

        joined_tags.insert(name.clone(), ltg.clone());
    }

    for name in assumed_tag_names {
        if remote_tags.contains_key(name) || local_tags.contains_key(name) {
            continue;
        }

        // Synthesized so brand-new tags participate in ordering and display
        let assumed = Tag {
            name: name.clone(),
            digest: NOT_AVAILABLE.to_string(),
            image_id: NOT_AVAILABLE.to_string(),
            created: 0,
            state: None,
        };

        let sort_key = assumed.sort_key();

        sorted_keys.push(sort_key.clone());
        tag_names.insert(sort_key, name.clone());

        joined_tags.insert(name.clone(), assumed);
    }

    for (name, jtg) in joined_tags.iter_mut() {
        jtg.state = Some(calculate_state(name, remote_tags, local_tags));
    }

    sorted_keys.sort();

    (sorted_keys, tag_names, joined_tags)
}

/// Flattens joined tags into the order given by the sorted keys
pub fn collect(
    keys: &[String],
    tag_names: &HashMap<String, String>,
    tag_map: &HashMap<String, Tag>,
) -> Vec<Tag> {
    keys.iter()
        .filter_map(|key| tag_names.get(key))
        .filter_map(|name| tag_map.get(name).cloned())
        .collect()
}
