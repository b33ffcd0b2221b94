//! Store inspection entry point.
//!
//! # Responsibility
//! - Load settings from an optional TOML file plus `POLYSTORE__*` overrides.
//! - Build the configured stores once and print one line per store.
//!
//! Usage: `polystore_cli [settings.toml] [prefix ...]`. Without prefixes the
//! default document, SQL and search prefixes are inspected when configured.

use log::{error, info};
use polystore_core::backend::document::DocumentStoreFactory;
use polystore_core::backend::search::SearchStore;
use polystore_core::backend::sql::SqliteSessionFactory;
use polystore_core::config::{DEFAULT_DOCUMENT_PREFIX, DEFAULT_SEARCH_PREFIX, DEFAULT_SQL_PREFIX};
use polystore_core::db::migrations::latest_version;
use polystore_core::{core_version, init_from_settings, RepoResult, SessionFactory, Settings};
use std::process::ExitCode;

const EXIT_CONFIGURATION: u8 = 2;

fn load_settings(path: Option<&str>) -> RepoResult<Settings> {
    let mut settings = match path {
        Some(path) => Settings::load(path)?,
        None => Settings::new(),
    };
    settings.merge(Settings::from_env());
    Ok(settings)
}

fn describe(settings: &Settings, documents: &DocumentStoreFactory, prefix: &str) -> RepoResult<String> {
    if prefix.starts_with("Sql.") {
        let factory = SqliteSessionFactory::from_settings(settings, prefix)?;
        factory.open_session()?;
        return Ok(format!(
            "{prefix}: {} schema_version={}",
            factory.source(),
            latest_version()
        ));
    }
    if prefix.starts_with("Search.") {
        let store = SearchStore::from_settings(settings, prefix)?;
        return Ok(format!("{prefix}: search index {}", store.source()));
    }
    Ok(documents.store(prefix)?.describe())
}

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let path = args.next();
    let mut prefixes = args.collect::<Vec<_>>();

    let settings = match load_settings(path.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("polystore: {err}");
            return ExitCode::from(EXIT_CONFIGURATION);
        }
    };
    if let Err(err) = init_from_settings(&settings) {
        eprintln!("polystore: {err}");
        return ExitCode::from(EXIT_CONFIGURATION);
    }
    info!(
        "event=cli_start module=cli status=ok version={} settings={}",
        core_version(),
        settings.len()
    );

    if prefixes.is_empty() {
        prefixes = [DEFAULT_DOCUMENT_PREFIX, DEFAULT_SQL_PREFIX, DEFAULT_SEARCH_PREFIX]
            .into_iter()
            .filter(|prefix| {
                settings.store_address(prefix).is_some()
                    || settings.get(&format!("{prefix}.ShardCount")).is_some()
            })
            .map(str::to_string)
            .collect();
    }

    println!("polystore_core version={}", core_version());
    let documents = DocumentStoreFactory::new(settings.clone());
    let mut failed = false;
    for prefix in &prefixes {
        match describe(&settings, &documents, prefix) {
            Ok(line) => println!("{line}"),
            Err(err) => {
                error!("event=cli_describe module=cli status=error prefix={prefix} error={err}");
                eprintln!("polystore: {prefix}: {err}");
                failed = true;
            }
        }
    }

    if failed {
        ExitCode::from(EXIT_CONFIGURATION)
    } else {
        ExitCode::SUCCESS
    }
}
