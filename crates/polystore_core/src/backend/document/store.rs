//! Document stores and the per-prefix store factory.

use super::engine::DocumentEngine;
use super::index::IndexDefinition;
use super::session::{DocumentOutput, DocumentSession, EngineSession, ShardedSession};
use crate::config::{Settings, DEFAULT_DOCUMENT_PREFIX};
use crate::error::{FailureDetail, PartialFailure, RepoError, RepoResult};
use crate::session::SessionFactory;
use crate::sharding::{ShardConfig, ShardMap, ShardStrategies, StrategyRegistry};
use dashmap::DashMap;
use log::{error, info};
use std::sync::Arc;
use std::time::Instant;

/// Shard map plus the strategies resolved for it.
#[derive(Debug)]
pub struct ShardedStore {
    pub(super) prefix: String,
    pub(super) map: ShardMap<Arc<DocumentEngine>>,
    pub(super) ids: Vec<String>,
    pub(super) strategies: ShardStrategies<DocumentOutput>,
}

/// One configured document store.
#[derive(Debug)]
pub enum DocumentStore {
    Single {
        prefix: String,
        engine: Arc<DocumentEngine>,
    },
    Sharded(Arc<ShardedStore>),
}

impl DocumentStore {
    pub fn single(prefix: impl Into<String>, engine: Arc<DocumentEngine>) -> Self {
        Self::Single {
            prefix: prefix.into(),
            engine,
        }
    }

    /// Builds a sharded store. `engines` must follow `config.shards` order.
    ///
    /// # Errors
    /// - `Configuration` when the engine count does not match the layout or
    ///   a strategy name is unknown.
    pub fn sharded(
        config: &ShardConfig,
        engines: Vec<Arc<DocumentEngine>>,
        registry: &StrategyRegistry<DocumentOutput>,
    ) -> RepoResult<Self> {
        if engines.len() != config.shards.len() {
            return Err(RepoError::Configuration(format!(
                "`{}` declares {} shards but {} engines were supplied",
                config.prefix,
                config.shards.len(),
                engines.len()
            )));
        }
        let strategies = registry.build(config)?;
        let map = ShardMap::new(config.shard_ids().into_iter().zip(engines).collect())?;
        let ids = map.ids();
        Ok(Self::Sharded(Arc::new(ShardedStore {
            prefix: config.prefix.clone(),
            map,
            ids,
            strategies,
        })))
    }

    pub fn prefix(&self) -> &str {
        match self {
            Self::Single { prefix, .. } => prefix,
            Self::Sharded(store) => &store.prefix,
        }
    }

    pub fn is_sharded(&self) -> bool {
        matches!(self, Self::Sharded(_))
    }

    /// Shard ids in map order; empty for unsharded stores.
    pub fn shard_ids(&self) -> Vec<String> {
        match self {
            Self::Single { .. } => Vec::new(),
            Self::Sharded(store) => store.ids.clone(),
        }
    }

    /// Engine backing `shard_id`, or the only engine of an unsharded store.
    pub fn engine(&self, shard_id: Option<&str>) -> Option<Arc<DocumentEngine>> {
        match (self, shard_id) {
            (Self::Single { engine, .. }, None) => Some(Arc::clone(engine)),
            (Self::Single { .. }, Some(_)) => None,
            (Self::Sharded(store), Some(id)) => {
                let index = store.map.index_of(id)?;
                store.map.get(index).map(|(_, engine)| Arc::clone(engine))
            }
            (Self::Sharded(_), None) => None,
        }
    }

    /// Puts `definition` on every engine of the store.
    ///
    /// # Errors
    /// - `InvalidData` when the definition does not validate.
    /// - `Backend` from a single engine, or `PartialFailure` naming the
    ///   shards that rejected the definition. Shards that accepted it keep it.
    pub fn put_index(&self, definition: IndexDefinition) -> RepoResult<()> {
        definition.validate()?;
        let name = definition.name.clone();
        let result = match self {
            Self::Single { engine, .. } => engine.put_index(definition),
            Self::Sharded(store) => {
                let mut outcome = PartialFailure::default();
                for (id, engine) in store.map.iter() {
                    match engine.put_index(definition.clone()) {
                        Ok(()) => outcome.succeeded += 1,
                        Err(err) => outcome.failures.push(FailureDetail::new(id, err)),
                    }
                }
                if outcome.failures.is_empty() {
                    Ok(())
                } else {
                    Err(RepoError::PartialFailure(outcome))
                }
            }
        };
        match &result {
            Ok(()) => info!(
                "event=index_put module=document status=ok prefix={} index={name}",
                self.prefix()
            ),
            Err(err) => error!(
                "event=index_put module=document status=error prefix={} index={name} error={err}",
                self.prefix()
            ),
        }
        result
    }

    /// One-line summary of the store layout.
    pub fn describe(&self) -> String {
        match self {
            Self::Single { prefix, engine } => {
                format!("{prefix}: single engine {}", engine.name())
            }
            Self::Sharded(store) => {
                let shards = store
                    .map
                    .iter()
                    .map(|(id, engine)| format!("{id}={}", engine.name()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "{}: {} shards [{shards}] resolution={} selection={} access={}",
                    store.prefix,
                    store.ids.len(),
                    store.strategies.resolution.name(),
                    store.strategies.selection.name(),
                    store.strategies.access.name()
                )
            }
        }
    }
}

impl SessionFactory for DocumentStore {
    type Session = DocumentSession;

    fn open_session(&self) -> RepoResult<DocumentSession> {
        Ok(match self {
            Self::Single { engine, .. } => {
                DocumentSession::Single(EngineSession::new(Arc::clone(engine), ""))
            }
            Self::Sharded(store) => {
                let sessions = store
                    .map
                    .iter()
                    .map(|(id, engine)| EngineSession::new(Arc::clone(engine), format!("{id}/")))
                    .collect();
                DocumentSession::Sharded(ShardedSession::new(Arc::clone(store), sessions))
            }
        })
    }

    fn source(&self) -> String {
        match self {
            Self::Single { engine, .. } => engine.name().to_string(),
            Self::Sharded(store) => store
                .map
                .iter()
                .map(|(_, engine)| engine.name())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Creates document stores from settings and caches them by prefix.
///
/// Engines are shared by address, so two prefixes pointing at the same URL
/// see the same data.
///
/// # Invariants
/// - Settings are fixed at construction. A prefix is resolved once; its
///   cached store never changes for the life of the factory.
pub struct DocumentStoreFactory {
    settings: Settings,
    stores: DashMap<String, Arc<DocumentStore>>,
    engines: DashMap<String, Arc<DocumentEngine>>,
    registry: StrategyRegistry<DocumentOutput>,
}

impl DocumentStoreFactory {
    pub fn new(settings: Settings) -> Self {
        Self::with_registry(settings, StrategyRegistry::with_builtins())
    }

    pub fn with_registry(settings: Settings, registry: StrategyRegistry<DocumentOutput>) -> Self {
        Self {
            settings,
            stores: DashMap::new(),
            engines: DashMap::new(),
            registry,
        }
    }

    /// Engine registered for `url`, created on first use.
    pub fn engine(&self, url: &str) -> Arc<DocumentEngine> {
        Arc::clone(
            self.engines
                .entry(url.to_string())
                .or_insert_with(|| Arc::new(DocumentEngine::new(url)))
                .value(),
        )
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Store configured under `prefix`, created once and cached.
    ///
    /// # Errors
    /// - `Configuration` when the prefix has neither an address nor a valid
    ///   shard layout.
    pub fn store(&self, prefix: &str) -> RepoResult<Arc<DocumentStore>> {
        if let Some(store) = self.stores.get(prefix) {
            return Ok(Arc::clone(store.value()));
        }

        let started_at = Instant::now();
        info!("event=store_create module=document status=start prefix={prefix}");
        let built = match self.build(prefix) {
            Ok(store) => Arc::new(store),
            Err(err) => {
                error!(
                    "event=store_create module=document status=error prefix={prefix} error={err}"
                );
                return Err(err);
            }
        };
        let store = Arc::clone(
            self.stores
                .entry(prefix.to_string())
                .or_insert(built)
                .value(),
        );
        info!(
            "event=store_create module=document status=ok prefix={prefix} sharded={} duration_ms={}",
            store.is_sharded(),
            started_at.elapsed().as_millis()
        );
        Ok(store)
    }

    pub fn default_store(&self) -> RepoResult<Arc<DocumentStore>> {
        self.store(DEFAULT_DOCUMENT_PREFIX)
    }

    /// Puts an index definition on the default store.
    ///
    /// # Errors
    /// - `Configuration` when no default store is configured, otherwise the
    ///   errors of `DocumentStore::put_index`.
    pub fn create_index(&self, definition: IndexDefinition) -> RepoResult<()> {
        self.default_store()?.put_index(definition)
    }

    /// Prefixes with a cached store, sorted.
    pub fn cached_prefixes(&self) -> Vec<String> {
        let mut prefixes = self
            .stores
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        prefixes.sort();
        prefixes
    }

    fn build(&self, prefix: &str) -> RepoResult<DocumentStore> {
        let settings = &self.settings;
        if let Some(config) = ShardConfig::from_settings(settings, prefix)? {
            let engines = config
                .shards
                .iter()
                .map(|shard| self.engine(&shard.url))
                .collect();
            return DocumentStore::sharded(&config, engines, &self.registry);
        }

        let address = settings.store_address(prefix).ok_or_else(|| {
            RepoError::Configuration(format!("no document store configured for `{prefix}`"))
        })?;
        Ok(DocumentStore::single(prefix, self.engine(address)))
    }
}

#[cfg(test)]
mod tests {
    use super::DocumentStoreFactory;
    use crate::config::Settings;
    use crate::error::RepoError;
    use std::sync::Arc;

    #[test]
    fn stores_are_cached_per_prefix_and_share_engines_by_url() {
        let factory = DocumentStoreFactory::new(
            Settings::new()
                .with("Document.Default", "mem://main")
                .with("Document.Reports.Url", "mem://main"),
        );
        let first = factory.default_store().unwrap();
        let again = factory.default_store().unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let reports = factory.store("Document.Reports").unwrap();
        assert!(Arc::ptr_eq(
            &first.engine(None).unwrap(),
            &reports.engine(None).unwrap()
        ));
        assert_eq!(
            factory.cached_prefixes(),
            vec!["Document.Default".to_string(), "Document.Reports".to_string()]
        );
    }

    #[test]
    fn missing_address_is_a_configuration_error() {
        let factory = DocumentStoreFactory::new(Settings::new());
        assert!(matches!(
            factory.default_store(),
            Err(RepoError::Configuration(_))
        ));
    }

    #[test]
    fn cached_store_keeps_its_first_layout() {
        let factory = DocumentStoreFactory::new(Settings::new().with("Document.Default", "mem://a"));
        let first = factory.default_store().unwrap();
        let engine = first.engine(None).unwrap();

        factory.engine("mem://b");
        let again = factory.default_store().unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(Arc::ptr_eq(&engine, &again.engine(None).unwrap()));
        assert_eq!(again.describe(), "Document.Default: single engine mem://a");
        assert_eq!(factory.cached_prefixes(), vec!["Document.Default".to_string()]);
    }
}
