use crate::config::AppConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration layered over built-in defaults: TOML file at
    /// `path`, then `HEDGEBOT_`-prefixed env vars (`__` separates nesting),
    /// then `config/Config.json` joined for any keys still unset.
    ///
    /// Missing files are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a present configuration file cannot be parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig> {
        let path = path.as_ref();
        let config: AppConfig = Self::base(path)
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Ok(config)
    }

    /// Loads configuration with a profile file layered over the base file,
    /// e.g. `config/Config.paper.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if a present configuration file cannot be parsed.
    pub fn load_with_profile(path: impl AsRef<Path>, profile: &str) -> Result<AppConfig> {
        let path = path.as_ref();
        let profile_path = path.with_extension(format!("{profile}.toml"));
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Toml::file(&profile_path))
            .merge(Env::prefixed("HEDGEBOT_").split("__"))
            .join(Json::file("config/Config.json"))
            .extract()
            .with_context(|| {
                format!(
                    "Failed to load config from {} with profile {}",
                    path.display(),
                    profile
                )
            })?;

        Ok(config)
    }

    fn base(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("HEDGEBOT_").split("__"))
            .join(Json::file("config/Config.json"))
    }
}
