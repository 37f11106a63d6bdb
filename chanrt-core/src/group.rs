use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One upstream target behind a group, with its selection weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupUpstream {
    pub url: String,

    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// A named routing target: binds a channel type, a set of upstreams, and
/// per-group configuration consumed by the bound adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub channel_type: String,

    pub upstreams: Vec<GroupUpstream>,

    #[serde(default)]
    pub test_model: Option<String>,

    #[serde(default)]
    pub validation_endpoint: Option<String>,

    /// Configuration merged at call time with the catalogue entry's own config.
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,

    /// Pre-computed config, as presented to the adapter (catalogue defaults
    /// overridden by group-specific values).
    #[serde(default)]
    pub effective_config: HashMap<String, serde_json::Value>,
}

impl Group {
    pub fn has_upstreams(&self) -> bool {
        !self.upstreams.is_empty()
    }

    /// A content hash the factory can compare against a cached channel
    /// instance's hash to decide whether it is stale (§4.4).
    pub fn config_hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.channel_type.as_bytes());
        for u in &self.upstreams {
            hasher.update(u.url.as_bytes());
            hasher.update(u.weight.to_le_bytes());
        }
        if let Ok(serialized) = serde_json::to_vec(&self.effective_config) {
            hasher.update(&serialized);
        }
        let digest = hasher.finalize();
        digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_group(weight: u32) -> Group {
        Group {
            id: "g1".into(),
            name: "g1".into(),
            channel_type: "openai_compatible".into(),
            upstreams: vec![GroupUpstream {
                url: "https://api.example.com".into(),
                weight,
            }],
            test_model: None,
            validation_endpoint: None,
            config: HashMap::new(),
            effective_config: HashMap::new(),
        }
    }

    #[test]
    fn test_default_weight() {
        let json = r#"{"url":"https://api.example.com"}"#;
        let u: GroupUpstream = serde_json::from_str(json).unwrap();
        assert_eq!(u.weight, 1);
    }

    #[test]
    fn test_has_upstreams() {
        let g = make_group(1);
        assert!(g.has_upstreams());
        let mut empty = make_group(1);
        empty.upstreams.clear();
        assert!(!empty.has_upstreams());
    }

    #[test]
    fn test_config_hash_changes_with_weight() {
        let a = make_group(1);
        let b = make_group(2);
        assert_ne!(a.config_hash(), b.config_hash());
    }

    #[test]
    fn test_config_hash_stable() {
        let a = make_group(5);
        let b = make_group(5);
        assert_eq!(a.config_hash(), b.config_hash());
    }
}
