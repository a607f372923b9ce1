//! Crate-wide configuration: the `TreeConfig`/`CacheConfig` pair, loaded
//! from TOML with validated defaults. When the `figment_config`
//! feature is enabled (the default), environment variables prefixed
//! `PAGETREE_` layer over the file, matching the "config file + env
//! override" shape common to embeddable stores.

use crate::{cache::memory::CacheConfig, error::Result, tree::TreeConfig};

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tree: TreeConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.tree.validate()
    }

    #[cfg(feature = "figment_config")]
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Toml},
            Figment,
        };
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("PAGETREE_").split("_"));
        let config: Config = figment
            .extract()
            .map_err(|e| crate::error::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(not(feature = "figment_config"))]
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                toml::from_str(&text).map_err(|e| crate::error::Error::Config(e.to_string()))?
            }
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[cfg(not(feature = "figment_config"))]
    #[test]
    fn loads_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pagetree.toml");
        std::fs::write(&path, "[tree]\ndegree = 8\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.tree.degree, 8);
    }
}
