//! §4.6.1 `CatalogueRepository` trait boundary, plus an in-process
//! `DashMap`-backed reference implementation standing in for the external
//! relational persistence layer named in §1. The reference implementation is
//! sufficient for single-node deployments and the included integration
//! tests; a real multi-node deployment implements this trait against its
//! own storage instead.

use chanrt_core::catalogue::{CatalogueEntry, CatalogueStatus};
use chanrt_core::error::ChannelError;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Storage boundary the Catalogue Service reaches through. No SQL or
/// storage-engine detail crosses this line into the core crates.
pub trait CatalogueRepository: Send + Sync {
    fn get(&self, id: u64) -> Option<CatalogueEntry>;
    fn get_by_channel_type(&self, channel_type: &str) -> Option<CatalogueEntry>;
    fn list(&self) -> Vec<CatalogueEntry>;
    fn list_by_status(&self, status: CatalogueStatus) -> Vec<CatalogueEntry>;
    fn insert(&self, entry: CatalogueEntry) -> Result<CatalogueEntry, ChannelError>;
    fn update(&self, entry: CatalogueEntry) -> Result<CatalogueEntry, ChannelError>;
    fn delete(&self, id: u64) -> Result<(), ChannelError>;
    fn next_id(&self) -> u64;
}

/// In-process reference implementation. Not durable across process restarts;
/// intended for single-node/standalone deployments and tests.
#[derive(Default)]
pub struct InMemoryCatalogueRepository {
    entries: DashMap<u64, CatalogueEntry>,
    ids: AtomicU64,
}

impl InMemoryCatalogueRepository {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            ids: AtomicU64::new(1),
        }
    }
}

impl CatalogueRepository for InMemoryCatalogueRepository {
    fn get(&self, id: u64) -> Option<CatalogueEntry> {
        self.entries.get(&id).map(|e| e.value().clone())
    }

    fn get_by_channel_type(&self, channel_type: &str) -> Option<CatalogueEntry> {
        self.entries
            .iter()
            .find(|e| e.value().channel_type == channel_type)
            .map(|e| e.value().clone())
    }

    fn list(&self) -> Vec<CatalogueEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    fn list_by_status(&self, status: CatalogueStatus) -> Vec<CatalogueEntry> {
        self.entries
            .iter()
            .filter(|e| e.value().status == status)
            .map(|e| e.value().clone())
            .collect()
    }

    fn insert(&self, entry: CatalogueEntry) -> Result<CatalogueEntry, ChannelError> {
        if self.entries.contains_key(&entry.id) {
            return Err(ChannelError::Constraint(format!(
                "catalogue entry with id {} already exists",
                entry.id
            )));
        }
        self.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    fn update(&self, entry: CatalogueEntry) -> Result<CatalogueEntry, ChannelError> {
        if !self.entries.contains_key(&entry.id) {
            return Err(ChannelError::NotFound(entry.id.to_string()));
        }
        self.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    fn delete(&self, id: u64) -> Result<(), ChannelError> {
        self.entries
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| ChannelError::NotFound(id.to_string()))
    }

    fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanrt_core::catalogue::AdapterMetadata;
    use std::collections::HashMap;

    fn entry(id: u64, channel_type: &str) -> CatalogueEntry {
        CatalogueEntry {
            id,
            name: format!("adapter_{id}"),
            display_name: "Test".into(),
            author: "t".into(),
            version: "1.0.0".into(),
            channel_type: channel_type.into(),
            script: "function exports() end".into(),
            metadata: AdapterMetadata {
                name: format!("adapter_{id}"),
                version: "1.0.0".into(),
                description: "".into(),
                author: "t".into(),
                channel_type: channel_type.into(),
                supported_models: vec![],
                default_test_model: None,
                default_validation_endpoint: None,
                required_config: vec![],
            },
            config: HashMap::new(),
            status: CatalogueStatus::Disabled,
            last_error: None,
            last_error_at: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let repo = InMemoryCatalogueRepository::new();
        repo.insert(entry(1, "openai_compatible")).unwrap();
        let got = repo.get(1).unwrap();
        assert_eq!(got.channel_type, "openai_compatible");
    }

    #[test]
    fn insert_rejects_duplicate_id() {
        let repo = InMemoryCatalogueRepository::new();
        repo.insert(entry(1, "a")).unwrap();
        let err = repo.insert(entry(1, "b")).unwrap_err();
        assert!(matches!(err, ChannelError::Constraint(_)));
    }

    #[test]
    fn get_by_channel_type_finds_match() {
        let repo = InMemoryCatalogueRepository::new();
        repo.insert(entry(1, "openai_compatible")).unwrap();
        assert!(repo.get_by_channel_type("openai_compatible").is_some());
        assert!(repo.get_by_channel_type("anthropic").is_none());
    }

    #[test]
    fn list_by_status_filters() {
        let repo = InMemoryCatalogueRepository::new();
        let mut e = entry(1, "a");
        e.status = CatalogueStatus::Enabled;
        repo.insert(e).unwrap();
        repo.insert(entry(2, "b")).unwrap();
        assert_eq!(repo.list_by_status(CatalogueStatus::Enabled).len(), 1);
        assert_eq!(repo.list_by_status(CatalogueStatus::Disabled).len(), 1);
    }

    #[test]
    fn delete_removes_entry() {
        let repo = InMemoryCatalogueRepository::new();
        repo.insert(entry(1, "a")).unwrap();
        repo.delete(1).unwrap();
        assert!(repo.get(1).is_none());
    }

    #[test]
    fn delete_missing_entry_errors() {
        let repo = InMemoryCatalogueRepository::new();
        assert!(repo.delete(99).is_err());
    }

    #[test]
    fn next_id_is_monotonic() {
        let repo = InMemoryCatalogueRepository::new();
        let a = repo.next_id();
        let b = repo.next_id();
        assert!(b > a);
    }
}
