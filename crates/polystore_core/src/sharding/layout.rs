//! Shard layout parsed from settings.

use crate::config::Settings;
use crate::error::{RepoError, RepoResult};
use std::collections::{BTreeMap, HashSet};

pub const DEFAULT_ACCESS_STRATEGY: &str = "parallel";
pub const DEFAULT_RESOLUTION_STRATEGY: &str = "hash";
pub const DEFAULT_SELECTION_STRATEGY: &str = "default";

/// Address and id of one configured shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSpec {
    pub id: String,
    pub url: String,
}

/// Validated shard layout for one configuration prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardConfig {
    pub prefix: String,
    pub shards: Vec<ShardSpec>,
    pub access: String,
    pub resolution: String,
    pub selection: String,
    pub lookup: BTreeMap<String, String>,
}

impl ShardConfig {
    /// Reads `<prefix>.ShardCount` and the per-shard keys.
    ///
    /// Returns `Ok(None)` when the prefix is not sharded.
    ///
    /// # Errors
    /// - `Configuration` for a zero or malformed count, missing `Url` or
    ///   `Identifier` entries, invalid or duplicate shard ids.
    pub fn from_settings(settings: &Settings, prefix: &str) -> RepoResult<Option<Self>> {
        let Some(count) = settings.get_parsed::<usize>(&format!("{prefix}.ShardCount"))? else {
            return Ok(None);
        };
        if count == 0 {
            return Err(RepoError::Configuration(format!(
                "`{prefix}.ShardCount` must be greater than zero"
            )));
        }

        let mut shards = Vec::with_capacity(count);
        let mut seen = HashSet::with_capacity(count);
        for index in 0..count {
            let url = required(settings, &format!("{prefix}.Shard.{index}.Url"))?;
            let id = required(settings, &format!("{prefix}.Shard.{index}.Identifier"))?;
            if !is_valid_shard_id(id) {
                return Err(RepoError::Configuration(format!(
                    "shard id `{id}` at `{prefix}.Shard.{index}` is invalid"
                )));
            }
            if !seen.insert(id.to_string()) {
                return Err(RepoError::Configuration(format!(
                    "shard id `{id}` is configured more than once under `{prefix}`"
                )));
            }
            shards.push(ShardSpec {
                id: id.to_string(),
                url: url.to_string(),
            });
        }

        let strategy = |name: &str, default: &str| {
            settings
                .get_non_empty(&format!("{prefix}.Shard.{name}"))
                .unwrap_or(default)
                .to_ascii_lowercase()
        };
        let lookup = settings
            .keys_with_prefix(&format!("{prefix}.Shard.Lookup"))
            .map(|(key, shard)| (key.to_string(), shard.trim().to_string()))
            .collect();

        Ok(Some(Self {
            prefix: prefix.to_string(),
            access: strategy("AccessStrategy", DEFAULT_ACCESS_STRATEGY),
            resolution: strategy("ResolutionStrategy", DEFAULT_RESOLUTION_STRATEGY),
            selection: strategy("SelectionStrategy", DEFAULT_SELECTION_STRATEGY),
            shards,
            lookup,
        }))
    }

    pub fn shard_ids(&self) -> Vec<String> {
        self.shards.iter().map(|shard| shard.id.clone()).collect()
    }
}

fn required<'a>(settings: &'a Settings, key: &str) -> RepoResult<&'a str> {
    settings
        .get_non_empty(key)
        .ok_or_else(|| RepoError::Configuration(format!("missing setting `{key}`")))
}

/// Shard ids prefix generated document ids, so they may not contain `/`.
fn is_valid_shard_id(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

/// Ordered `(shard id, store)` pairs, immutable after construction.
#[derive(Debug)]
pub struct ShardMap<S> {
    entries: Vec<(String, S)>,
}

impl<S> ShardMap<S> {
    /// # Errors
    /// - `Configuration` for an empty map or duplicate ids.
    pub fn new(entries: Vec<(String, S)>) -> RepoResult<Self> {
        if entries.is_empty() {
            return Err(RepoError::Configuration(
                "shard map needs at least one shard".to_string(),
            ));
        }
        let mut seen = HashSet::with_capacity(entries.len());
        for (id, _) in &entries {
            if !seen.insert(id.as_str()) {
                return Err(RepoError::Configuration(format!(
                    "shard id `{id}` appears more than once"
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn get(&self, index: usize) -> Option<(&str, &S)> {
        self.entries
            .get(index)
            .map(|(id, store)| (id.as_str(), store))
    }

    pub fn index_of(&self, shard_id: &str) -> Option<usize> {
        self.entries.iter().position(|(id, _)| id == shard_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &S)> {
        self.entries.iter().map(|(id, store)| (id.as_str(), store))
    }
}

#[cfg(test)]
mod tests {
    use super::{ShardConfig, ShardMap};
    use crate::config::Settings;

    fn two_shards() -> Settings {
        Settings::new()
            .with("Doc.ShardCount", "2")
            .with("Doc.Shard.0.Url", "mem://a")
            .with("Doc.Shard.0.Identifier", "a")
            .with("Doc.Shard.1.Url", "mem://b")
            .with("Doc.Shard.1.Identifier", "b")
    }

    #[test]
    fn unsharded_prefix_returns_none() {
        assert!(ShardConfig::from_settings(&Settings::new(), "Doc")
            .unwrap()
            .is_none());
    }

    #[test]
    fn defaults_apply_when_strategies_are_absent() {
        let config = ShardConfig::from_settings(&two_shards(), "Doc")
            .unwrap()
            .unwrap();
        assert_eq!(config.shard_ids(), vec!["a", "b"]);
        assert_eq!(config.access, "parallel");
        assert_eq!(config.resolution, "hash");
        assert_eq!(config.selection, "default");
    }

    #[test]
    fn duplicate_ids_and_missing_urls_are_rejected() {
        let duplicate = two_shards().with("Doc.Shard.1.Identifier", "a");
        assert!(ShardConfig::from_settings(&duplicate, "Doc").is_err());

        let missing = two_shards().with("Doc.ShardCount", "3");
        let err = ShardConfig::from_settings(&missing, "Doc").unwrap_err();
        assert!(err.to_string().contains("Doc.Shard.2.Url"));

        let zero = two_shards().with("Doc.ShardCount", "0");
        assert!(ShardConfig::from_settings(&zero, "Doc").is_err());
    }

    #[test]
    fn shard_map_rejects_duplicates() {
        assert!(ShardMap::new(vec![("a".to_string(), 1), ("a".to_string(), 2)]).is_err());
        let map = ShardMap::new(vec![("a".to_string(), 1), ("b".to_string(), 2)]).unwrap();
        assert_eq!(map.index_of("b"), Some(1));
        assert_eq!(map.get(0), Some(("a", &1)));
    }
}
