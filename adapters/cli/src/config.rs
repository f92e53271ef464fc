use std::{fs, path::Path};

use anyhow::{Context, Result};
use dreamflap_world::EnvConfig;
use serde::Deserialize;

use crate::reference::ReferenceConfig;

/// Settings file consumed by the binary.
///
/// ```toml
/// [world.sampler]
/// num_steps = 3
/// order = "heun"
///
/// [reference]
/// flap_rows = 4
/// ```
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct AppConfig {
    /// Environment and sampler tuning.
    pub(crate) world: EnvConfig,
    /// Tuning of the model-free capabilities.
    pub(crate) reference: ReferenceConfig,
}

impl AppConfig {
    /// Reads the configuration at `path`.
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub(crate) fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid dreamflap configuration")
    }
}

#[cfg(test)]
mod tests {
    use dreamflap_world::RecurrentActionPolicy;

    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        assert_eq!(AppConfig::parse("").expect("parses"), AppConfig::default());
    }

    #[test]
    fn nested_tables_override_defaults() {
        let config = AppConfig::parse(
            r#"
            [world]
            recurrent_action = "latched"

            [world.sampler]
            num_steps = 5
            seed = 9

            [reference]
            flap_rows = 4
            "#,
        )
        .expect("parses");

        assert_eq!(config.world.sampler.num_steps, 5);
        assert_eq!(config.world.sampler.seed, 9);
        assert_eq!(config.world.recurrent_action, RecurrentActionPolicy::Latched);
        assert_eq!(config.reference.flap_rows, 4);
        assert_eq!(config.reference.gravity_rows, 1);
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let shipped = AppConfig::parse(include_str!("../../../config/dreamflap.toml"))
            .expect("shipped config parses");
        assert_eq!(shipped, AppConfig::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(AppConfig::parse("[world]\nframe_skip = 2\n").is_err());
    }
}
