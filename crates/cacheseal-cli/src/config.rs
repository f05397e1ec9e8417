use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use cacheseal_core::{KeyName, KeySize, ProviderConfig};
use cacheseal_keystore::StoreKind;
use color_eyre::{
    eyre::{bail, eyre, WrapErr},
    Result,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DEFAULT_APP_NAME: &str = "cacheseal";

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "CACHESEAL_CONFIG";

/// User-level configuration, read from `$CACHESEAL_CONFIG` or
/// `<config dir>/cacheseal/config.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Application the key belongs to; the key name is derived from it.
    pub app_name: Option<String>,
    /// Key store model to open.
    pub backend: StoreKind,
    /// Key size and access scope used when the key pair has to be created.
    pub provider: ProviderConfig,
}

impl Config {
    pub fn key_name(&self) -> KeyName {
        KeyName::for_application(self.app_name.as_deref().unwrap_or(DEFAULT_APP_NAME))
    }

    /// Reject scope flags the selected backend cannot honor. A flag that is
    /// silently dropped would change who can read the cache.
    fn validate(&self) -> Result<()> {
        let scope = self.provider.scope;
        match self.backend {
            StoreKind::Keystore if scope.shared_across_users || scope.sync_across_devices => {
                bail!("backend \"keystore\" is per-application; remove [provider.scope] flags")
            }
            StoreKind::Keychain if scope.shared_across_users => {
                bail!("backend \"keychain\" cannot share keys across users; use \"data-protection\"")
            }
            StoreKind::DataProtection if scope.sync_across_devices => {
                bail!("backend \"data-protection\" cannot sync across devices; use \"keychain\"")
            }
            StoreKind::DataProtection if self.provider.key_size != KeySize::default() => {
                warn!(
                    bits = self.provider.key_size.bits(),
                    "key_size is ignored by the data-protection backend"
                );
            }
            _ => {}
        }
        Ok(())
    }
}

/// Where the config lives: `$CACHESEAL_CONFIG` when set, else the platform
/// config dir.
pub fn config_path() -> Result<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join("cacheseal").join("config.toml"))
        .ok_or_else(|| eyre!("no config dir available; set {CONFIG_ENV}"))
}

pub fn load() -> Result<Config> {
    load_from(&config_path()?)
}

/// Read and validate the config at `path`. A missing or blank file yields
/// the defaults.
pub fn load_from(path: &Path) -> Result<Config> {
    let config = match fs::read_to_string(path) {
        Ok(body) if body.trim().is_empty() => Config::default(),
        Ok(body) => toml::from_str(&body)
            .wrap_err_with(|| format!("invalid config at {}", path.display()))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file, using defaults");
            Config::default()
        }
        Err(err) => {
            return Err(err).wrap_err_with(|| format!("cannot read {}", path.display()))
        }
    };
    config
        .validate()
        .wrap_err_with(|| format!("invalid config at {}", path.display()))?;
    Ok(config)
}

/// Write the given config unless a file already exists there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    let path = config_path()?;
    write_if_missing(config, &path)?;
    Ok(path)
}

fn write_if_missing(config: &Config, path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    config.validate()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, toml::to_string_pretty(config)?)?;
    Ok(())
}
