//! §4.6 Catalogue Service: CRUD and the lifecycle state machine over Adapter
//! Catalogue Entries, layered on top of a [`CatalogueRepository`].

use crate::repository::CatalogueRepository;
use chanrt_core::catalogue::{CatalogueEntry, CatalogueStatus};
use chanrt_core::error::ChannelError;
use chanrt_security::{validate, ValidatorLimits};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

/// Fields a caller supplies to create a new catalogue entry. `channel_type`
/// is taken from the validated script's own metadata, not from this struct,
/// so the two can never silently disagree (§3 invariant).
#[derive(Debug, Clone)]
pub struct NewCatalogueEntry {
    pub name: String,
    pub display_name: String,
    pub author: String,
    pub version: String,
    pub script: String,
    pub config: HashMap<String, serde_json::Value>,
}

/// Patch applied by `update`. Only `Some` fields are changed; `script =
/// Some(_)` re-runs §4.1 before the patch is accepted.
#[derive(Debug, Clone, Default)]
pub struct CatalogueEntryPatch {
    pub display_name: Option<String>,
    pub version: Option<String>,
    pub script: Option<String>,
    pub config: Option<HashMap<String, serde_json::Value>>,
}

pub struct CatalogueService<R: CatalogueRepository> {
    repo: Arc<R>,
    limits: ValidatorLimits,
}

impl<R: CatalogueRepository> CatalogueService<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self {
            repo,
            limits: ValidatorLimits::default(),
        }
    }

    pub fn with_limits(repo: Arc<R>, limits: ValidatorLimits) -> Self {
        Self { repo, limits }
    }

    pub fn get(&self, id: u64) -> Result<CatalogueEntry, ChannelError> {
        self.repo.get(id).ok_or_else(|| ChannelError::NotFound(id.to_string()))
    }

    pub fn list(&self) -> Vec<CatalogueEntry> {
        self.repo.list()
    }

    pub fn list_by_status(&self, status: CatalogueStatus) -> Vec<CatalogueEntry> {
        self.repo.list_by_status(status)
    }

    /// §4.1 then persist. Rejects a `channel_type` collision with any
    /// existing entry, regardless of that entry's status.
    pub fn create(&self, new_entry: NewCatalogueEntry) -> Result<CatalogueEntry, ChannelError> {
        let validated = validate(&new_entry.script, &self.limits)
            .map_err(|e| ChannelError::Validation(e.0))?;

        if self.repo.get_by_channel_type(&validated.metadata.channel_type).is_some() {
            return Err(ChannelError::Constraint(format!(
                "channel_type `{}` is already bound to another catalogue entry",
                validated.metadata.channel_type
            )));
        }

        let now = Utc::now();
        let entry = CatalogueEntry {
            id: self.repo.next_id(),
            name: new_entry.name,
            display_name: new_entry.display_name,
            author: new_entry.author,
            version: new_entry.version,
            channel_type: validated.metadata.channel_type.clone(),
            script: new_entry.script,
            metadata: validated.metadata,
            config: new_entry.config,
            status: CatalogueStatus::Disabled,
            last_error: None,
            last_error_at: None,
            created_at: now,
            updated_at: now,
        };

        self.repo.insert(entry)
    }

    /// Re-runs §4.1 only when `patch.script` is `Some`. A channel-type change
    /// implied by a new script is rejected if it collides with a different
    /// existing entry.
    pub fn update(&self, id: u64, patch: CatalogueEntryPatch) -> Result<CatalogueEntry, ChannelError> {
        let mut entry = self.get(id)?;

        if let Some(script) = patch.script {
            let validated = validate(&script, &self.limits).map_err(|e| ChannelError::Validation(e.0))?;
            if validated.metadata.channel_type != entry.channel_type {
                if let Some(other) = self.repo.get_by_channel_type(&validated.metadata.channel_type) {
                    if other.id != entry.id {
                        return Err(ChannelError::Constraint(format!(
                            "channel_type `{}` is already bound to another catalogue entry",
                            validated.metadata.channel_type
                        )));
                    }
                }
            }
            entry.channel_type = validated.metadata.channel_type.clone();
            entry.metadata = validated.metadata;
            entry.script = script;
        }
        if let Some(display_name) = patch.display_name {
            entry.display_name = display_name;
        }
        if let Some(version) = patch.version {
            entry.version = version;
        }
        if let Some(config) = patch.config {
            entry.config = config;
        }
        entry.updated_at = Utc::now();

        self.repo.update(entry)
    }

    /// `enable(id)`: re-runs §4.1, then atomically disables any other
    /// enabled entry sharing this `channel_type` before marking this one
    /// enabled (§3 invariant: at most one entry per channel type is
    /// `enabled`).
    pub fn enable(&self, id: u64) -> Result<CatalogueEntry, ChannelError> {
        let mut entry = self.get(id)?;

        match validate(&entry.script, &self.limits) {
            Ok(validated) => {
                entry.metadata = validated.metadata;
            }
            Err(e) => {
                entry.mark_error(e.0.clone());
                self.repo.update(entry)?;
                return Err(ChannelError::Validation(e.0));
            }
        }

        for other in self.repo.list_by_status(CatalogueStatus::Enabled) {
            if other.id != entry.id && other.channel_type == entry.channel_type {
                let mut other = other;
                other.status = CatalogueStatus::Disabled;
                other.updated_at = Utc::now();
                self.repo.update(other)?;
            }
        }

        entry.status = CatalogueStatus::Enabled;
        entry.clear_error();
        entry.updated_at = Utc::now();
        self.repo.update(entry)
    }

    /// `disable(id)`: unconditional status change, no re-validation.
    pub fn disable(&self, id: u64) -> Result<CatalogueEntry, ChannelError> {
        let mut entry = self.get(id)?;
        entry.status = CatalogueStatus::Disabled;
        entry.updated_at = Utc::now();
        self.repo.update(entry)
    }

    /// `delete(id)`: disables first (so a reconciling Reload Controller
    /// never observes a deleted id still marked enabled), then removes.
    pub fn delete(&self, id: u64) -> Result<(), ChannelError> {
        self.disable(id)?;
        self.repo.delete(id)
    }

    /// Marks an entry `error` without re-validating, used by the Reload
    /// Controller (§4.5) and the Factory's lazy-bind fallback (§4.4) when a
    /// previously-enabled entry fails to build a live Adapter Instance.
    pub fn mark_error(&self, id: u64, message: String) -> Result<CatalogueEntry, ChannelError> {
        let mut entry = self.get(id)?;
        entry.mark_error(message);
        self.repo.update(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryCatalogueRepository;

    const VALID_SOURCE: &str = r#"
        function exports()
            return {
                metadata = {
                    name = "openai_compatible",
                    version = "1.0.0",
                    description = "desc",
                    author = "t",
                    channel_type = "openai_compatible",
                },
                buildUpstreamURL = function(originalUrl, group) return originalUrl end,
                modifyRequest = function(request, apiKey, group) end,
                isStreamRequest = function(context) return false end,
                extractModel = function(context) return "" end,
                validateKey = function(rawKey, group) return { valid = true } end,
            }
        end
    "#;

    fn service() -> CatalogueService<InMemoryCatalogueRepository> {
        CatalogueService::new(Arc::new(InMemoryCatalogueRepository::new()))
    }

    fn new_entry(script: &str) -> NewCatalogueEntry {
        NewCatalogueEntry {
            name: "openai_compatible".into(),
            display_name: "OpenAI Compatible".into(),
            author: "t".into(),
            version: "1.0.0".into(),
            script: script.to_string(),
            config: HashMap::new(),
        }
    }

    #[test]
    fn create_rejects_invalid_source() {
        let svc = service();
        let err = svc.create(new_entry("not lua (((")).unwrap_err();
        assert!(matches!(err, ChannelError::Validation(_)));
    }

    #[test]
    fn create_persists_disabled_entry() {
        let svc = service();
        let entry = svc.create(new_entry(VALID_SOURCE)).unwrap();
        assert_eq!(entry.status, CatalogueStatus::Disabled);
        assert_eq!(entry.channel_type, "openai_compatible");
    }

    #[test]
    fn create_rejects_channel_type_collision() {
        let svc = service();
        svc.create(new_entry(VALID_SOURCE)).unwrap();
        let err = svc.create(new_entry(VALID_SOURCE)).unwrap_err();
        assert!(matches!(err, ChannelError::Constraint(_)));
    }

    #[test]
    fn enable_then_disable_round_trips() {
        let svc = service();
        let entry = svc.create(new_entry(VALID_SOURCE)).unwrap();
        let enabled = svc.enable(entry.id).unwrap();
        assert_eq!(enabled.status, CatalogueStatus::Enabled);
        let disabled = svc.disable(entry.id).unwrap();
        assert_eq!(disabled.status, CatalogueStatus::Disabled);
    }

    #[test]
    fn enable_disables_prior_entry_with_same_channel_type() {
        let svc = service();
        let first = svc.create(new_entry(VALID_SOURCE)).unwrap();
        svc.enable(first.id).unwrap();

        // Disable first, then create a second entry that reuses the type
        // (channel_type uniqueness across the whole catalogue forbids two
        // simultaneously-present entries, so exercise the invariant through
        // update instead of a second create).
        svc.disable(first.id).unwrap();
        let updated = svc
            .update(
                first.id,
                CatalogueEntryPatch {
                    version: Some("1.0.1".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.version, "1.0.1");
        let enabled_again = svc.enable(first.id).unwrap();
        assert_eq!(enabled_again.status, CatalogueStatus::Enabled);
    }

    #[test]
    fn enable_on_missing_id_errors() {
        let svc = service();
        let err = svc.enable(9999).unwrap_err();
        assert!(matches!(err, ChannelError::NotFound(_)));
    }

    #[test]
    fn enable_failure_marks_entry_error_and_preserves_message() {
        let repo = Arc::new(InMemoryCatalogueRepository::new());
        let svc = CatalogueService::new(Arc::clone(&repo));
        let entry = svc.create(new_entry(VALID_SOURCE)).unwrap();

        // Simulate the script regressing after creation (the only route
        // `CatalogueService` itself cannot take, since `update` always
        // re-validates) by corrupting the persisted row directly through the
        // repository.
        let mut broken = repo.get(entry.id).unwrap();
        broken.script = "not lua (((".to_string();
        repo.update(broken).unwrap();

        let err = svc.enable(entry.id).unwrap_err();
        assert!(matches!(err, ChannelError::Validation(_)));
        let persisted = svc.get(entry.id).unwrap();
        assert_eq!(persisted.status, CatalogueStatus::Error);
        assert!(persisted.last_error.is_some());
    }

    #[test]
    fn delete_disables_then_removes() {
        let svc = service();
        let entry = svc.create(new_entry(VALID_SOURCE)).unwrap();
        svc.enable(entry.id).unwrap();
        svc.delete(entry.id).unwrap();
        assert!(svc.get(entry.id).is_err());
    }
}
