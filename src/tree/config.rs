//! Tree-level configuration, paired with [`crate::cache::memory::CacheConfig`].
//! Both are `serde`-deserializable from TOML so a host can ship a single
//! config file covering tree shape and cache sizing.

use crate::error::{Error, Result};

/// Validated configuration for a [`super::Tree`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TreeConfig {
    /// Node fan-out bound; every non-root node holds between
    /// `⌈degree/2⌉` and `degree` keys or pivots.
    pub degree: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig { degree: 64 }
    }
}

impl TreeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.degree < 3 {
            return Err(Error::Config(format!(
                "degree must be >= 3, got {}",
                self.degree
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        TreeConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_small_degree() {
        let cfg = TreeConfig { degree: 2 };
        assert!(cfg.validate().is_err());
    }
}
