//! Flat dotted settings for store configuration.
//!
//! # Responsibility
//! - Load `<prefix>.<key>` settings from TOML, key/value pairs or the
//!   process environment.
//! - Provide typed lookups that report configuration errors by key.
//!
//! # Invariants
//! - Keys are stored verbatim and iterated in sorted order.
//! - Environment keys use the `POLYSTORE__` prefix with `__` as separator.

use crate::error::{RepoError, RepoResult};
use log::{error, info};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

pub const ENV_PREFIX: &str = "POLYSTORE__";
const ENV_SEPARATOR: &str = "__";

pub const DEFAULT_DOCUMENT_PREFIX: &str = "Document.Default";
pub const DEFAULT_SQL_PREFIX: &str = "Sql.Default";
pub const DEFAULT_SEARCH_PREFIX: &str = "Search.Default";

/// Ordered flat settings map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns a trimmed, non-empty value.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Parses a value when present.
    ///
    /// # Errors
    /// - `Configuration` when the value does not parse as `T`.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> RepoResult<Option<T>> {
        match self.get_non_empty(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
                RepoError::Configuration(format!("setting `{key}` has invalid value `{raw}`"))
            }),
        }
    }

    /// Unsharded store address: `<prefix>` or `<prefix>.Url`.
    pub fn store_address(&self, prefix: &str) -> Option<&str> {
        self.get_non_empty(prefix)
            .or_else(|| self.get_non_empty(&format!("{prefix}.Url")))
    }

    /// Iterates `(suffix, value)` for keys starting with `<prefix>.`.
    pub fn keys_with_prefix<'a>(
        &'a self,
        prefix: &str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        let head = format!("{prefix}.");
        let skip = head.len();
        self.values
            .range(head.clone()..)
            .take_while(move |(key, _)| key.starts_with(head.as_str()))
            .filter_map(move |(key, value)| key.get(skip..).map(|suffix| (suffix, value.as_str())))
    }

    /// Overlays `other`; its values win on conflicts.
    pub fn merge(&mut self, other: Settings) {
        self.values.extend(other.values);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Flattens a TOML document into dotted keys.
    ///
    /// # Errors
    /// - `Configuration` for invalid TOML or array values.
    pub fn from_toml_str(text: &str) -> RepoResult<Self> {
        let table = text.parse::<toml::Table>()?;
        let mut settings = Self::new();
        flatten_table("", &table, &mut settings)?;
        Ok(settings)
    }

    /// Reads and flattens a TOML settings file.
    pub fn load(path: impl AsRef<Path>) -> RepoResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            error!(
                "event=settings_load module=config status=error path={} error={err}",
                path.display()
            );
            RepoError::Configuration(format!(
                "cannot read settings file `{}`: {err}",
                path.display()
            ))
        })?;
        let settings = Self::from_toml_str(&text)?;
        info!(
            "event=settings_load module=config status=ok path={} keys={}",
            path.display(),
            settings.len()
        );
        Ok(settings)
    }

    /// Collects `POLYSTORE__A__B=value` variables as `A.B = value`.
    pub fn from_env_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self::from_pairs(vars.into_iter().filter_map(|(key, value)| {
            key.strip_prefix(ENV_PREFIX)
                .filter(|rest| !rest.is_empty())
                .map(|rest| (rest.replace(ENV_SEPARATOR, "."), value))
        }))
    }

    pub fn from_env() -> Self {
        Self::from_env_vars(std::env::vars())
    }
}

fn flatten_table(prefix: &str, table: &toml::Table, out: &mut Settings) -> RepoResult<()> {
    for (key, value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            toml::Value::Table(nested) => flatten_table(&path, nested, out)?,
            toml::Value::String(text) => out.set(path, text.clone()),
            toml::Value::Integer(number) => out.set(path, number.to_string()),
            toml::Value::Float(number) => out.set(path, number.to_string()),
            toml::Value::Boolean(flag) => out.set(path, flag.to_string()),
            toml::Value::Datetime(stamp) => out.set(path, stamp.to_string()),
            toml::Value::Array(_) => {
                return Err(RepoError::Configuration(format!(
                    "setting `{path}` is an array; use indexed keys instead"
                )))
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Settings;

    #[test]
    fn toml_tables_flatten_to_dotted_keys() {
        let settings = Settings::from_toml_str(
            r#"
            [Document.Default]
            ShardCount = 2
            Shard.0.Url = "mem://a"
            Shard.0.Identifier = "a"
            Shard.AccessStrategy = "sequential"

            [Logging]
            Level = "info"
            "#,
        )
        .unwrap();

        assert_eq!(settings.get("Document.Default.ShardCount"), Some("2"));
        assert_eq!(settings.get("Document.Default.Shard.0.Url"), Some("mem://a"));
        assert_eq!(
            settings.get("Document.Default.Shard.AccessStrategy"),
            Some("sequential")
        );
        assert_eq!(settings.get("Logging.Level"), Some("info"));
    }

    #[test]
    fn toml_arrays_are_rejected() {
        let err = Settings::from_toml_str("Hosts = [\"a\", \"b\"]").unwrap_err();
        assert!(err.to_string().contains("Hosts"));
    }

    #[test]
    fn env_vars_map_double_underscore_to_dots() {
        let settings = Settings::from_env_vars(vec![
            ("POLYSTORE__Sql__Default".to_string(), ":memory:".to_string()),
            ("PATH".to_string(), "/bin".to_string()),
            ("POLYSTORE__".to_string(), "ignored".to_string()),
        ]);

        assert_eq!(settings.len(), 1);
        assert_eq!(settings.get("Sql.Default"), Some(":memory:"));
    }

    #[test]
    fn prefix_iteration_and_typed_lookup() {
        let settings = Settings::new()
            .with("Doc.Shard.Lookup.eu", "a")
            .with("Doc.Shard.Lookup.us", "b")
            .with("Doc.ShardCount", "x")
            .with("Docs", "other");

        let lookups = settings
            .keys_with_prefix("Doc.Shard.Lookup")
            .collect::<Vec<_>>();
        assert_eq!(lookups, vec![("eu", "a"), ("us", "b")]);
        assert!(settings.get_parsed::<usize>("Doc.ShardCount").is_err());
        assert_eq!(settings.get_parsed::<usize>("Doc.Missing").unwrap(), None);
    }

    #[test]
    fn store_address_accepts_url_suffix() {
        let settings = Settings::new().with("Search.Default.Url", "catalog");
        assert_eq!(settings.store_address("Search.Default"), Some("catalog"));
    }
}
