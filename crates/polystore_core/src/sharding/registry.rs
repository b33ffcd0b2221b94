//! Compile-time registry of named sharding strategies.

use super::layout::ShardConfig;
use super::strategy::{
    DefaultSelection, FirstShardSelection, HashResolution, LookupResolution, ParallelAccess,
    SequentialAccess, ShardAccessStrategy, ShardResolutionStrategy, ShardSelectionStrategy,
};
use crate::error::{RepoError, RepoResult};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};

pub type ResolutionFactory = fn(&ShardConfig) -> RepoResult<Box<dyn ShardResolutionStrategy>>;
pub type SelectionFactory = fn() -> Box<dyn ShardSelectionStrategy>;
pub type AccessFactory<T> = fn() -> Box<dyn ShardAccessStrategy<T>>;

/// Strategy registration and lookup errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyRegistryError {
    InvalidStrategyName(String),
    DuplicateStrategyName { kind: &'static str, name: String },
    StrategyNotFound { kind: &'static str, name: String },
}

impl Display for StrategyRegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidStrategyName(name) => write!(f, "strategy name is invalid: {name}"),
            Self::DuplicateStrategyName { kind, name } => {
                write!(f, "{kind} strategy already registered: {name}")
            }
            Self::StrategyNotFound { kind, name } => {
                write!(f, "unknown {kind} strategy: {name}")
            }
        }
    }
}

impl Error for StrategyRegistryError {}

impl From<StrategyRegistryError> for RepoError {
    fn from(value: StrategyRegistryError) -> Self {
        Self::Configuration(value.to_string())
    }
}

/// Strategies resolved for one store.
pub struct ShardStrategies<T> {
    pub resolution: Box<dyn ShardResolutionStrategy>,
    pub selection: Box<dyn ShardSelectionStrategy>,
    pub access: Box<dyn ShardAccessStrategy<T>>,
}

impl<T> Debug for ShardStrategies<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardStrategies")
            .field("resolution", &self.resolution.name())
            .field("selection", &self.selection.name())
            .field("access", &self.access.name())
            .finish()
    }
}

/// Name to factory tables for every strategy kind.
pub struct StrategyRegistry<T> {
    resolution: BTreeMap<String, ResolutionFactory>,
    selection: BTreeMap<String, SelectionFactory>,
    access: BTreeMap<String, AccessFactory<T>>,
}

impl<T> Default for StrategyRegistry<T> {
    fn default() -> Self {
        Self {
            resolution: BTreeMap::new(),
            selection: BTreeMap::new(),
            access: BTreeMap::new(),
        }
    }
}

impl<T: Send + 'static> StrategyRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `hash`, `lookup`, `default`, `first`, `sequential`
    /// and `parallel`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: [(&str, ResolutionFactory); 2] = [
            ("hash", |_| Ok(Box::new(HashResolution))),
            ("lookup", |config| {
                Ok(Box::new(LookupResolution::new(
                    config.lookup.clone(),
                    &config.shard_ids(),
                )?))
            }),
        ];
        for (name, factory) in builtins {
            registry.resolution.insert(name.to_string(), factory);
        }
        registry
            .selection
            .insert("default".to_string(), || Box::new(DefaultSelection));
        registry
            .selection
            .insert("first".to_string(), || Box::new(FirstShardSelection));
        registry
            .access
            .insert("sequential".to_string(), || Box::new(SequentialAccess));
        registry
            .access
            .insert("parallel".to_string(), || Box::new(ParallelAccess));
        registry
    }

    pub fn register_resolution(
        &mut self,
        name: &str,
        factory: ResolutionFactory,
    ) -> Result<(), StrategyRegistryError> {
        insert_named(&mut self.resolution, "resolution", name, factory)
    }

    pub fn register_selection(
        &mut self,
        name: &str,
        factory: SelectionFactory,
    ) -> Result<(), StrategyRegistryError> {
        insert_named(&mut self.selection, "selection", name, factory)
    }

    pub fn register_access(
        &mut self,
        name: &str,
        factory: AccessFactory<T>,
    ) -> Result<(), StrategyRegistryError> {
        insert_named(&mut self.access, "access", name, factory)
    }

    /// Returns sorted names per kind: resolution, selection, access.
    pub fn names(&self) -> (Vec<String>, Vec<String>, Vec<String>) {
        (
            self.resolution.keys().cloned().collect(),
            self.selection.keys().cloned().collect(),
            self.access.keys().cloned().collect(),
        )
    }

    /// Instantiates the strategies named by `config`.
    ///
    /// # Errors
    /// - `Configuration` for unknown names or invalid strategy arguments.
    pub fn build(&self, config: &ShardConfig) -> RepoResult<ShardStrategies<T>> {
        let resolution = lookup(&self.resolution, "resolution", &config.resolution)?;
        let selection = lookup(&self.selection, "selection", &config.selection)?;
        let access = lookup(&self.access, "access", &config.access)?;
        Ok(ShardStrategies {
            resolution: resolution(config)?,
            selection: selection(),
            access: access(),
        })
    }
}

fn insert_named<F>(
    table: &mut BTreeMap<String, F>,
    kind: &'static str,
    name: &str,
    factory: F,
) -> Result<(), StrategyRegistryError> {
    let name = name.trim().to_string();
    if !is_valid_strategy_name(&name) {
        return Err(StrategyRegistryError::InvalidStrategyName(name));
    }
    if table.contains_key(name.as_str()) {
        return Err(StrategyRegistryError::DuplicateStrategyName { kind, name });
    }
    table.insert(name, factory);
    Ok(())
}

fn lookup<F: Copy>(
    table: &BTreeMap<String, F>,
    kind: &'static str,
    name: &str,
) -> Result<F, StrategyRegistryError> {
    table
        .get(name.trim())
        .copied()
        .ok_or_else(|| StrategyRegistryError::StrategyNotFound {
            kind,
            name: name.to_string(),
        })
}

fn is_valid_strategy_name(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::{StrategyRegistry, StrategyRegistryError};
    use crate::config::Settings;
    use crate::error::RepoError;
    use crate::sharding::{ShardConfig, ShardSelectionStrategy};

    fn config(access: &str) -> ShardConfig {
        let settings = Settings::new()
            .with("Doc.ShardCount", "1")
            .with("Doc.Shard.0.Url", "mem://a")
            .with("Doc.Shard.0.Identifier", "a")
            .with("Doc.Shard.AccessStrategy", access);
        ShardConfig::from_settings(&settings, "Doc").unwrap().unwrap()
    }

    struct LastSelection;

    impl ShardSelectionStrategy for LastSelection {
        fn name(&self) -> &'static str {
            "last"
        }

        fn select(&self, target: Option<usize>, shard_count: usize) -> Vec<usize> {
            target
                .or(shard_count.checked_sub(1))
                .into_iter()
                .collect()
        }
    }

    #[test]
    fn builtins_resolve_configured_names() {
        let registry = StrategyRegistry::<u32>::with_builtins();
        let strategies = registry.build(&config("Sequential")).unwrap();
        assert_eq!(strategies.access.name(), "sequential");
        assert_eq!(strategies.resolution.name(), "hash");
        assert_eq!(strategies.selection.name(), "default");
    }

    #[test]
    fn unknown_names_are_configuration_errors() {
        let registry = StrategyRegistry::<u32>::with_builtins();
        let err = registry.build(&config("round-robin")).unwrap_err();
        assert!(matches!(err, RepoError::Configuration(message) if message.contains("round-robin")));
    }

    #[test]
    fn custom_strategies_register_once() {
        let mut registry = StrategyRegistry::<u32>::with_builtins();
        registry
            .register_selection("last", || Box::new(LastSelection))
            .unwrap();

        assert_eq!(
            registry.register_selection("last", || Box::new(LastSelection)),
            Err(StrategyRegistryError::DuplicateStrategyName {
                kind: "selection",
                name: "last".to_string()
            })
        );
        assert_eq!(
            registry.register_selection("Bad Name", || Box::new(LastSelection)),
            Err(StrategyRegistryError::InvalidStrategyName("Bad Name".to_string()))
        );
        assert!(registry.names().1.contains(&"last".to_string()));
    }
}
