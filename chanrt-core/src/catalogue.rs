use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a catalogue entry.
///
/// `disabled -> enabled` re-runs validation; `enabled -> error` happens only
/// when a reconciliation tick fails to rebuild the adapter after its source
/// changed (see the reload controller). `error` entries are never loaded by
/// the factory; they return to `enabled` only through a fresh `enable()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogueStatus {
    Disabled,
    Enabled,
    Error,
}

impl Default for CatalogueStatus {
    fn default() -> Self {
        CatalogueStatus::Disabled
    }
}

/// Structured metadata an adapter's `exports()` object must carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub channel_type: String,

    #[serde(default)]
    pub supported_models: Vec<String>,

    #[serde(default)]
    pub default_test_model: Option<String>,

    #[serde(default)]
    pub default_validation_endpoint: Option<String>,

    #[serde(default)]
    pub required_config: Vec<String>,
}

/// A persisted adapter catalogue row: identity, source, and lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogueEntry {
    pub id: u64,

    pub name: String,
    pub display_name: String,
    pub author: String,
    pub version: String,

    /// Unique across the whole catalogue, regardless of status.
    pub channel_type: String,

    pub script: String,

    pub metadata: AdapterMetadata,

    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,

    #[serde(default)]
    pub status: CatalogueStatus,

    #[serde(default)]
    pub last_error: Option<String>,

    #[serde(default)]
    pub last_error_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogueEntry {
    /// `updatedAt || sha256(source)[:16]` — the version the reload controller
    /// diffs against to decide whether an entry needs rebuilding.
    pub fn content_version(&self) -> String {
        self.updated_at.to_rfc3339()
    }

    pub fn source_digest(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.script.as_bytes());
        let digest = hasher.finalize();
        digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
    }

    pub fn is_enabled(&self) -> bool {
        self.status == CatalogueStatus::Enabled
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = CatalogueStatus::Error;
        self.last_error = Some(message.into());
        self.last_error_at = Some(Utc::now());
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
        self.last_error_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(script: &str) -> CatalogueEntry {
        CatalogueEntry {
            id: 1,
            name: "openai_compatible".into(),
            display_name: "OpenAI Compatible".into(),
            author: "test".into(),
            version: "1.0.0".into(),
            channel_type: "openai_compatible".into(),
            script: script.into(),
            metadata: AdapterMetadata {
                name: "openai_compatible".into(),
                version: "1.0.0".into(),
                description: "".into(),
                author: "test".into(),
                channel_type: "openai_compatible".into(),
                supported_models: vec![],
                default_test_model: None,
                default_validation_endpoint: None,
                required_config: vec![],
            },
            config: HashMap::new(),
            status: CatalogueStatus::Disabled,
            last_error: None,
            last_error_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_default_status_is_disabled() {
        let e = make_entry("return {}");
        assert_eq!(e.status, CatalogueStatus::Disabled);
        assert!(!e.is_enabled());
    }

    #[test]
    fn test_source_digest_is_stable() {
        let e1 = make_entry("return {}");
        let e2 = make_entry("return {}");
        assert_eq!(e1.source_digest(), e2.source_digest());
        let e3 = make_entry("return { x = 1 }");
        assert_ne!(e1.source_digest(), e3.source_digest());
    }

    #[test]
    fn test_mark_and_clear_error() {
        let mut e = make_entry("return {}");
        e.mark_error("boom");
        assert_eq!(e.status, CatalogueStatus::Error);
        assert_eq!(e.last_error.as_deref(), Some("boom"));
        e.clear_error();
        assert!(e.last_error.is_none());
        assert!(e.last_error_at.is_none());
    }
}
