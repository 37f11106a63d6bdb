//! §4.5 Reload Controller: reconciles `enabled` catalogue entries against
//! live dynamic constructors on the Factory, on a 30-second tick plus
//! on-demand `reload_one`/`reload_all`.

use chanrt_adapter::AdapterInstance;
use chanrt_catalogue::{CatalogueRepository, CatalogueService};
use chanrt_core::catalogue::CatalogueStatus;
use chanrt_core::config::SandboxConfig;
use chanrt_core::error::ChannelError;
use chanrt_core::group::Group;
use chanrt_factory::{Channel, ChannelFactory};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct TrackedAdapter {
    entry_id: u64,
    version: String,
    channel: Arc<dyn Channel>,
}

/// The controller's own reconciliation state: the last-seen version per
/// channel type. Guarded by its own mutex (§4.5 "the controller takes its
/// own mutex while reconciling").
pub struct ReloadController<R: CatalogueRepository> {
    catalogue: Arc<CatalogueService<R>>,
    factory: Arc<ChannelFactory<R>>,
    sandbox_config: SandboxConfig,
    tracked: Mutex<HashMap<String, TrackedAdapter>>,
}

impl<R: CatalogueRepository + 'static> ReloadController<R> {
    pub fn new(
        catalogue: Arc<CatalogueService<R>>,
        factory: Arc<ChannelFactory<R>>,
        sandbox_config: SandboxConfig,
    ) -> Self {
        Self {
            catalogue,
            factory,
            sandbox_config,
            tracked: Mutex::new(HashMap::new()),
        }
    }

    /// One full reconciliation pass over every `enabled` catalogue entry.
    pub fn reload_all(&self) {
        let enabled = self.catalogue.list_by_status(CatalogueStatus::Enabled);
        let mut tracked = self.tracked.lock().expect("reload controller mutex poisoned");

        let mut seen_types = std::collections::HashSet::new();
        for entry in &enabled {
            seen_types.insert(entry.channel_type.clone());
            let version = entry.content_version();
            let needs_rebuild = tracked
                .get(&entry.channel_type)
                .map(|t| t.version != version)
                .unwrap_or(true);
            if !needs_rebuild {
                continue;
            }

            match AdapterInstance::build(entry, &self.sandbox_config) {
                Ok(adapter) => {
                    let channel: Arc<dyn Channel> = Arc::new(adapter);
                    let channel_type = entry.channel_type.clone();
                    let bound = Arc::clone(&channel);
                    self.factory.register_dynamic(
                        channel_type.clone(),
                        Arc::new(move |_group: &Group| Ok(Arc::clone(&bound) as Arc<dyn Channel>)),
                    );
                    tracked.insert(
                        channel_type.clone(),
                        TrackedAdapter {
                            entry_id: entry.id,
                            version,
                            channel: Arc::clone(&channel),
                        },
                    );
                    self.factory.invalidate_by_channel_type(&channel_type);
                    tracing::info!(channel_type = %channel_type, entry_id = entry.id, "adapter instance (re)built");
                }
                Err(e) => {
                    tracing::error!(
                        channel_type = %entry.channel_type,
                        entry_id = entry.id,
                        error = %e,
                        "failed to rebuild adapter instance; leaving prior instance live"
                    );
                }
            }
        }

        let stale_types: Vec<String> = tracked
            .keys()
            .filter(|t| !seen_types.contains(*t))
            .cloned()
            .collect();
        for channel_type in stale_types {
            self.factory.unregister_dynamic(&channel_type);
            self.factory.invalidate_by_channel_type(&channel_type);
            tracked.remove(&channel_type);
            tracing::info!(channel_type = %channel_type, "channel type unregistered (entry disabled or deleted)");
        }
    }

    /// Restricts the same reconciliation steps to a single entry's channel
    /// type (including the removal branch, if the entry is no longer
    /// enabled or no longer exists).
    pub fn reload_one(&self, id: u64) -> Result<(), ChannelError> {
        let entry = self.catalogue.get(id);
        let mut tracked = self.tracked.lock().expect("reload controller mutex poisoned");

        match entry {
            Some(entry) if entry.status == CatalogueStatus::Enabled => {
                let version = entry.content_version();
                let needs_rebuild = tracked
                    .get(&entry.channel_type)
                    .map(|t| t.version != version)
                    .unwrap_or(true);
                if !needs_rebuild {
                    return Ok(());
                }
                match AdapterInstance::build(&entry, &self.sandbox_config) {
                    Ok(adapter) => {
                        let channel: Arc<dyn Channel> = Arc::new(adapter);
                        let channel_type = entry.channel_type.clone();
                        let bound = Arc::clone(&channel);
                        self.factory.register_dynamic(
                            channel_type.clone(),
                            Arc::new(move |_group: &Group| Ok(Arc::clone(&bound) as Arc<dyn Channel>)),
                        );
                        tracked.insert(
                            channel_type.clone(),
                            TrackedAdapter {
                                entry_id: entry.id,
                                version,
                                channel: Arc::clone(&channel),
                            },
                        );
                        self.factory.invalidate_by_channel_type(&channel_type);
                        Ok(())
                    }
                    Err(e) => {
                        tracing::error!(entry_id = id, error = %e, "reload_one failed to rebuild adapter instance");
                        Err(e)
                    }
                }
            }
            _ => {
                let stale_type = tracked
                    .iter()
                    .find(|(_, t)| t.entry_id == id)
                    .map(|(ct, _)| ct.clone());
                if let Some(channel_type) = stale_type {
                    self.factory.unregister_dynamic(&channel_type);
                    self.factory.invalidate_by_channel_type(&channel_type);
                    tracked.remove(&channel_type);
                }
                Ok(())
            }
        }
    }

    /// Recent adapter log lines for the script backing `entry_id`'s ring
    /// buffer (§6.1 `GET /scripts/:id/logs`), or `None` if this entry has
    /// never been tracked (disabled, deleted, or never reloaded).
    pub fn recent_logs(&self, entry_id: u64) -> Option<Vec<chanrt_sandbox::LogRecord>> {
        let tracked = self.tracked.lock().expect("reload controller mutex poisoned");
        tracked
            .values()
            .find(|t| t.entry_id == entry_id)
            .and_then(|t| t.channel.as_any().downcast_ref::<AdapterInstance>())
            .map(|adapter| adapter.recent_logs())
    }

    /// Spawns the 30-second background reconciliation loop. Returns the
    /// `JoinHandle` so the caller can abort it on shutdown.
    pub fn spawn(self: Arc<Self>, tick: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                self.reload_all();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanrt_catalogue::{InMemoryCatalogueRepository, NewCatalogueEntry};
    use std::collections::HashMap as Map;

    const SOURCE_V1: &str = r#"
        function exports()
            return {
                metadata = { name = "n", version = "1.0.0", description = "d", author = "a", channel_type = "openai_compatible" },
                buildUpstreamURL = function(originalUrl, group) return "v1:" .. originalUrl end,
                modifyRequest = function(request, apiKey, group) end,
                isStreamRequest = function(context) return false end,
                extractModel = function(context) return "" end,
                validateKey = function(rawKey, group) return { valid = true } end,
            }
        end
    "#;

    const SOURCE_V2: &str = r#"
        function exports()
            return {
                metadata = { name = "n", version = "2.0.0", description = "d", author = "a", channel_type = "openai_compatible" },
                buildUpstreamURL = function(originalUrl, group) return "v2:" .. originalUrl end,
                modifyRequest = function(request, apiKey, group) end,
                isStreamRequest = function(context) return false end,
                extractModel = function(context) return "" end,
                validateKey = function(rawKey, group) return { valid = true } end,
            }
        end
    "#;

    fn group(id: &str) -> Group {
        Group {
            id: id.into(),
            name: id.into(),
            channel_type: "openai_compatible".into(),
            upstreams: vec![chanrt_core::group::GroupUpstream {
                url: "https://api.example.com".into(),
                weight: 1,
            }],
            test_model: None,
            validation_endpoint: None,
            config: Map::new(),
            effective_config: Map::new(),
        }
    }

    fn setup() -> (
        Arc<CatalogueService<InMemoryCatalogueRepository>>,
        Arc<ChannelFactory<InMemoryCatalogueRepository>>,
        ReloadController<InMemoryCatalogueRepository>,
    ) {
        let repo = Arc::new(InMemoryCatalogueRepository::new());
        let catalogue = Arc::new(CatalogueService::new(repo));
        let factory = Arc::new(ChannelFactory::new(
            HashMap::new(),
            Arc::clone(&catalogue),
            SandboxConfig::default(),
        ));
        let controller = ReloadController::new(Arc::clone(&catalogue), Arc::clone(&factory), SandboxConfig::default());
        (catalogue, factory, controller)
    }

    #[test]
    fn tick_builds_adapter_for_newly_enabled_entry() {
        let (catalogue, factory, controller) = setup();
        let entry = catalogue
            .create(NewCatalogueEntry {
                name: "n".into(),
                display_name: "N".into(),
                author: "a".into(),
                version: "1.0.0".into(),
                script: SOURCE_V1.into(),
                config: Map::new(),
            })
            .unwrap();
        catalogue.enable(entry.id).unwrap();

        controller.reload_all();
        let instance = factory.get_channel(&group("g1")).unwrap();
        assert_eq!(instance.channel.build_upstream_url("/x", &group("g1")).unwrap(), "v1:/x");
    }

    #[test]
    fn tick_does_not_rebuild_when_version_unchanged() {
        let (catalogue, factory, controller) = setup();
        let entry = catalogue
            .create(NewCatalogueEntry {
                name: "n".into(),
                display_name: "N".into(),
                author: "a".into(),
                version: "1.0.0".into(),
                script: SOURCE_V1.into(),
                config: Map::new(),
            })
            .unwrap();
        catalogue.enable(entry.id).unwrap();
        controller.reload_all();
        let before = factory.get_channel(&group("g1")).unwrap();
        controller.reload_all();
        let after = factory.get_channel(&group("g1")).unwrap();
        assert_eq!(before.config_hash, after.config_hash);
    }

    #[test]
    fn disabling_entry_unregisters_channel_type() {
        let (catalogue, factory, controller) = setup();
        let entry = catalogue
            .create(NewCatalogueEntry {
                name: "n".into(),
                display_name: "N".into(),
                author: "a".into(),
                version: "1.0.0".into(),
                script: SOURCE_V1.into(),
                config: Map::new(),
            })
            .unwrap();
        catalogue.enable(entry.id).unwrap();
        controller.reload_all();
        factory.get_channel(&group("g1")).unwrap();

        catalogue.disable(entry.id).unwrap();
        controller.reload_all();

        let err = factory.get_channel(&group("g2")).unwrap_err();
        assert!(matches!(err, ChannelError::ChannelTypeNotFound(_)));
    }

    #[test]
    fn reload_one_rebuilds_only_the_targeted_entry() {
        let (catalogue, factory, controller) = setup();
        let entry = catalogue
            .create(NewCatalogueEntry {
                name: "n".into(),
                display_name: "N".into(),
                author: "a".into(),
                version: "1.0.0".into(),
                script: SOURCE_V1.into(),
                config: Map::new(),
            })
            .unwrap();
        catalogue.enable(entry.id).unwrap();
        controller.reload_one(entry.id).unwrap();
        let instance = factory.get_channel(&group("g1")).unwrap();
        assert_eq!(instance.channel.build_upstream_url("/x", &group("g1")).unwrap(), "v1:/x");
    }

    #[test]
    fn hot_reload_updates_script_content_within_one_tick() {
        let (catalogue, factory, controller) = setup();
        let entry = catalogue
            .create(NewCatalogueEntry {
                name: "n".into(),
                display_name: "N".into(),
                author: "a".into(),
                version: "1.0.0".into(),
                script: SOURCE_V1.into(),
                config: Map::new(),
            })
            .unwrap();
        catalogue.enable(entry.id).unwrap();
        controller.reload_all();
        factory.get_channel(&group("g1")).unwrap();

        catalogue
            .update(
                entry.id,
                chanrt_catalogue::CatalogueEntryPatch {
                    script: Some(SOURCE_V2.into()),
                    ..Default::default()
                },
            )
            .unwrap();
        controller.reload_all();
        factory.invalidate("g1");
        let instance = factory.get_channel(&group("g1")).unwrap();
        assert_eq!(instance.channel.build_upstream_url("/x", &group("g1")).unwrap(), "v2:/x");
    }
}
