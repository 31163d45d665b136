use directories::ProjectDirs;
use std::path::PathBuf;

use crate::config::ChatConfig;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "skillexchange";
pub const APP_NAME: &str = "sx-chat";

pub const DATA_DIR_ENV: &str = "SX_CHAT_DATA_DIR";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(override_path));
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join("chat.json"))
}

pub fn key_vault_path(config: &ChatConfig) -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join(&config.key_store.database_file))
}
