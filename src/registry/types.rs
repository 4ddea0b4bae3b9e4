//! Wire types for the registry HTTP protocol (§4.6.1).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub expires: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetInfo {
    pub slug: String,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushInitResponse {
    #[serde(rename = "neededFiles", default)]
    pub needed_files: Vec<String>,
    #[serde(rename = "neededMeta", default)]
    pub needed_meta: Vec<Uuid>,
    pub token: String,
    #[serde(rename = "pullRequired", default)]
    pub pull_required: Option<bool>,
}

/// `tags.json` (§6.1): `<registryUrl>/<org>/<dataset>` naming a remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub registry_url: String,
    pub org: String,
    pub dataset: String,
}

impl Tag {
    /// Parses `<registry>/<org>/<dataset>` (GLOSSARY "Tag"). The registry
    /// host may itself contain slashes (a scheme), so org/dataset are taken
    /// from the end.
    pub fn parse(raw: &str) -> Option<Tag> {
        let mut parts: Vec<&str> = raw.rsplitn(3, '/').collect();
        if parts.len() != 3 {
            return None;
        }
        parts.reverse();
        Some(Tag {
            registry_url: parts[0].to_string(),
            org: parts[1].to_string(),
            dataset: parts[2].to_string(),
        })
    }

    pub fn render(&self) -> String {
        format!("{}/{}/{}", self.registry_url, self.org, self.dataset)
    }
}

/// `sync.json` (§6.1): last-known remote stamp per registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncBook {
    pub entries: std::collections::HashMap<String, crate::index::stamp::Stamp>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trips_through_parse_and_render() {
        let tag = Tag::parse("hub.dronedb.app/acme/survey-2026").unwrap();
        assert_eq!(tag.registry_url, "hub.dronedb.app");
        assert_eq!(tag.org, "acme");
        assert_eq!(tag.dataset, "survey-2026");
        assert_eq!(tag.render(), "hub.dronedb.app/acme/survey-2026");
    }
}
