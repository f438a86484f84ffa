//! CLI command implementations

pub mod check;
pub mod run;
pub mod terminal;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use coderail::config::{ConfigStore, Settings};

/// Build the config store from an explicit path or the default location.
pub fn load_store(config_path: Option<PathBuf>) -> Result<Arc<ConfigStore>> {
    let store = match config_path.or_else(Settings::default_path) {
        Some(path) => ConfigStore::from_path(path)?,
        None => ConfigStore::new(Settings::default()),
    };
    Ok(Arc::new(store))
}

/// Print the effective configuration as toml.
pub fn config_command(store: Arc<ConfigStore>) -> Result<()> {
    let settings = store.snapshot();
    print!("{}", toml::to_string_pretty(&settings)?);
    Ok(())
}
