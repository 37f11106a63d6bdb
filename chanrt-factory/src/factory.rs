//! §4.4 Channel Factory: resolves a [`Group`] to a cached
//! [`ChannelInstance`], building one on demand from a static constructor, a
//! registered dynamic (script-backed) constructor, or — as a last resort —
//! a direct lazy bind against an `enabled` catalogue entry.

use crate::channel::Channel;
use chanrt_adapter::AdapterInstance;
use chanrt_catalogue::{CatalogueRepository, CatalogueService};
use chanrt_core::catalogue::CatalogueStatus;
use chanrt_core::config::SandboxConfig;
use chanrt_core::error::ChannelError;
use chanrt_core::group::Group;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// A constructor takes a group and produces a fresh channel for it.
pub type ChannelConstructor = Arc<dyn Fn(&Group) -> Result<Arc<dyn Channel>, ChannelError> + Send + Sync>;

/// Cached per-group binding (§3 "Channel Instance"), invalidated when the
/// group's config hash changes, the underlying adapter reloads, or the
/// channel type is unregistered.
#[derive(Clone)]
pub struct ChannelInstance {
    pub channel: Arc<dyn Channel>,
    pub channel_type: String,
    pub config_hash: String,
}

pub struct ChannelFactory<R: CatalogueRepository> {
    static_constructors: HashMap<String, ChannelConstructor>,
    dynamic_constructors: RwLock<HashMap<String, ChannelConstructor>>,
    instance_cache: Mutex<HashMap<String, ChannelInstance>>,
    catalogue: Arc<CatalogueService<R>>,
    sandbox_config: SandboxConfig,
}

impl<R: CatalogueRepository> ChannelFactory<R> {
    pub fn new(
        static_constructors: HashMap<String, ChannelConstructor>,
        catalogue: Arc<CatalogueService<R>>,
        sandbox_config: SandboxConfig,
    ) -> Self {
        Self {
            static_constructors,
            dynamic_constructors: RwLock::new(HashMap::new()),
            instance_cache: Mutex::new(HashMap::new()),
            catalogue,
            sandbox_config,
        }
    }

    /// §4.4 resolution: cache hit on a matching config hash; otherwise
    /// dynamic constructor, then static constructor, then a last-resort
    /// lazy bind against the catalogue.
    pub fn get_channel(&self, group: &Group) -> Result<ChannelInstance, ChannelError> {
        let config_hash = group.config_hash();

        if let Some(cached) = self.instance_cache.lock().expect("instance cache mutex poisoned").get(&group.id) {
            if cached.config_hash == config_hash {
                return Ok(cached.clone());
            }
        }

        let channel = if let Some(ctor) = self
            .dynamic_constructors
            .read()
            .expect("dynamic constructors lock poisoned")
            .get(&group.channel_type)
            .cloned()
        {
            ctor(group)?
        } else if let Some(ctor) = self.static_constructors.get(&group.channel_type).cloned() {
            ctor(group)?
        } else {
            self.lazy_bind(group)?
        };

        let instance = ChannelInstance {
            channel,
            channel_type: group.channel_type.clone(),
            config_hash,
        };
        self.instance_cache
            .lock()
            .expect("instance cache mutex poisoned")
            .insert(group.id.clone(), instance.clone());
        Ok(instance)
    }

    /// (c) last-resort: find an `enabled` catalogue entry for this channel
    /// type and build an Adapter Instance directly, covering the window
    /// before the Reload Controller's next tick. On failure the entry is
    /// marked `error`.
    fn lazy_bind(&self, group: &Group) -> Result<Arc<dyn Channel>, ChannelError> {
        let enabled = self.catalogue.list_by_status(CatalogueStatus::Enabled);
        let entry = enabled
            .into_iter()
            .find(|e| e.channel_type == group.channel_type)
            .ok_or_else(|| ChannelError::ChannelTypeNotFound(group.channel_type.clone()))?;

        match AdapterInstance::build(&entry, &self.sandbox_config) {
            Ok(adapter) => Ok(Arc::new(adapter) as Arc<dyn Channel>),
            Err(e) => {
                let _ = self.catalogue.mark_error(entry.id, e.to_string());
                Err(e)
            }
        }
    }

    pub fn register_dynamic(&self, channel_type: String, constructor: ChannelConstructor) {
        self.dynamic_constructors
            .write()
            .expect("dynamic constructors lock poisoned")
            .insert(channel_type, constructor);
    }

    /// Does not itself evict cache entries bound to `channel_type`; the
    /// Reload Controller calls `invalidate` for each affected group.
    pub fn unregister_dynamic(&self, channel_type: &str) {
        self.dynamic_constructors
            .write()
            .expect("dynamic constructors lock poisoned")
            .remove(channel_type);
    }

    pub fn invalidate(&self, group_id: &str) {
        self.instance_cache
            .lock()
            .expect("instance cache mutex poisoned")
            .remove(group_id);
    }

    pub fn invalidate_all(&self) {
        self.instance_cache.lock().expect("instance cache mutex poisoned").clear();
    }

    /// Invalidates every cached instance bound to `channel_type`, used by
    /// the Reload Controller after a hot reload or unregistration.
    pub fn invalidate_by_channel_type(&self, channel_type: &str) {
        self.instance_cache
            .lock()
            .expect("instance cache mutex poisoned")
            .retain(|_, instance| instance.channel_type != channel_type);
    }

    /// Channel types backed by a compile-time static constructor.
    pub fn static_channel_types(&self) -> Vec<String> {
        self.static_constructors.keys().cloned().collect()
    }

    /// Channel types currently backed by a registered dynamic (script)
    /// constructor.
    pub fn dynamic_channel_types(&self) -> Vec<String> {
        self.dynamic_constructors
            .read()
            .expect("dynamic constructors lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Union of static and dynamic channel type tags (§6.1 `GET /channel-types`).
    pub fn all_channel_types(&self) -> Vec<String> {
        let mut types = self.static_channel_types();
        for t in self.dynamic_channel_types() {
            if !types.contains(&t) {
                types.push(t);
            }
        }
        types
    }

    pub fn cached_group_ids(&self) -> Vec<String> {
        self.instance_cache
            .lock()
            .expect("instance cache mutex poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanrt_catalogue::{InMemoryCatalogueRepository, NewCatalogueEntry};
    use chanrt_core::context::{AdapterRequest, RequestContext};
    use std::collections::HashMap as Map;

    struct StubChannel(String);
    impl Channel for StubChannel {
        fn build_upstream_url(&self, original_url: &str, _group: &Group) -> Result<String, ChannelError> {
            Ok(format!("{}{}", self.0, original_url))
        }
        fn modify_request(&self, _r: &mut AdapterRequest, _k: &str, _g: &Group) -> Result<(), ChannelError> {
            Ok(())
        }
        fn is_stream_request(&self, _c: &RequestContext) -> bool {
            false
        }
        fn extract_model(&self, _c: &RequestContext) -> String {
            String::new()
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    fn group(id: &str, channel_type: &str) -> Group {
        Group {
            id: id.into(),
            name: id.into(),
            channel_type: channel_type.into(),
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

    fn factory() -> ChannelFactory<InMemoryCatalogueRepository> {
        let catalogue = Arc::new(CatalogueService::new(Arc::new(InMemoryCatalogueRepository::new())));
        ChannelFactory::new(HashMap::new(), catalogue, SandboxConfig::default())
    }

    #[test]
    fn static_constructor_is_used_when_no_dynamic_registered() {
        let catalogue = Arc::new(CatalogueService::new(Arc::new(InMemoryCatalogueRepository::new())));
        let mut statics: HashMap<String, ChannelConstructor> = HashMap::new();
        statics.insert(
            "builtin".to_string(),
            Arc::new(|_g: &Group| Ok(Arc::new(StubChannel("static:".into())) as Arc<dyn Channel>)),
        );
        let factory = ChannelFactory::new(statics, catalogue, SandboxConfig::default());
        let instance = factory.get_channel(&group("g1", "builtin")).unwrap();
        assert_eq!(instance.channel.build_upstream_url("/x", &group("g1", "builtin")).unwrap(), "static:/x");
    }

    #[test]
    fn dynamic_constructor_takes_priority_over_static() {
        let factory = factory();
        factory.register_dynamic(
            "openai_compatible".to_string(),
            Arc::new(|_g: &Group| Ok(Arc::new(StubChannel("dynamic:".into())) as Arc<dyn Channel>)),
        );
        let instance = factory.get_channel(&group("g1", "openai_compatible")).unwrap();
        assert_eq!(
            instance.channel.build_upstream_url("/x", &group("g1", "openai_compatible")).unwrap(),
            "dynamic:/x"
        );
    }

    #[test]
    fn cache_hit_reuses_instance_when_config_hash_matches() {
        let factory = factory();
        let calls = Arc::new(Mutex::new(0u32));
        let calls2 = Arc::clone(&calls);
        factory.register_dynamic(
            "openai_compatible".to_string(),
            Arc::new(move |_g: &Group| {
                *calls2.lock().unwrap() += 1;
                Ok(Arc::new(StubChannel("dynamic:".into())) as Arc<dyn Channel>)
            }),
        );
        let g = group("g1", "openai_compatible");
        factory.get_channel(&g).unwrap();
        factory.get_channel(&g).unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn invalidate_forces_rebuild() {
        let factory = factory();
        let calls = Arc::new(Mutex::new(0u32));
        let calls2 = Arc::clone(&calls);
        factory.register_dynamic(
            "openai_compatible".to_string(),
            Arc::new(move |_g: &Group| {
                *calls2.lock().unwrap() += 1;
                Ok(Arc::new(StubChannel("dynamic:".into())) as Arc<dyn Channel>)
            }),
        );
        let g = group("g1", "openai_compatible");
        factory.get_channel(&g).unwrap();
        factory.invalidate("g1");
        factory.get_channel(&g).unwrap();
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn unknown_channel_type_without_catalogue_entry_fails() {
        let factory = factory();
        let err = factory.get_channel(&group("g1", "unknown")).unwrap_err();
        assert!(matches!(err, ChannelError::ChannelTypeNotFound(_)));
    }

    #[test]
    fn lazy_bind_constructs_from_enabled_catalogue_entry() {
        let repo = Arc::new(InMemoryCatalogueRepository::new());
        let catalogue = Arc::new(CatalogueService::new(Arc::clone(&repo)));
        let source = r#"
            function exports()
                return {
                    metadata = {
                        name = "n", version = "1.0.0", description = "d", author = "a",
                        channel_type = "openai_compatible",
                    },
                    buildUpstreamURL = function(originalUrl, group) return "lazy:" .. originalUrl end,
                    modifyRequest = function(request, apiKey, group) end,
                    isStreamRequest = function(context) return false end,
                    extractModel = function(context) return "" end,
                    validateKey = function(rawKey, group) return { valid = true } end,
                }
            end
        "#;
        let entry = catalogue
            .create(NewCatalogueEntry {
                name: "n".into(),
                display_name: "N".into(),
                author: "a".into(),
                version: "1.0.0".into(),
                script: source.into(),
                config: Map::new(),
            })
            .unwrap();
        catalogue.enable(entry.id).unwrap();

        let factory = ChannelFactory::new(HashMap::new(), catalogue, SandboxConfig::default());
        let instance = factory.get_channel(&group("g1", "openai_compatible")).unwrap();
        assert_eq!(
            instance.channel.build_upstream_url("/x", &group("g1", "openai_compatible")).unwrap(),
            "lazy:/x"
        );
    }
}
