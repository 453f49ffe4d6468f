use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;

use crate::domain::models::config::{AdapterConfig, OperatorConfig};

/// Loads [`OperatorConfig`] with hierarchical merging.
///
/// Precedence (lowest to highest):
/// 1. Programmatic defaults (`Serialized`)
/// 2. `/etc/scaletide/operator.yaml` (cluster-wide defaults, optional)
/// 3. A path passed explicitly (e.g. from a `--config` flag), optional
/// 4. Environment variables (`SCALETIDE_` prefix, highest priority)
pub struct OperatorConfigLoader;

impl OperatorConfigLoader {
    pub fn load(extra_file: Option<&std::path::Path>) -> Result<OperatorConfig> {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(OperatorConfig::default()))
            .merge(Yaml::file("/etc/scaletide/operator.yaml"));
        if let Some(path) = extra_file {
            figment = figment.merge(Yaml::file(path));
        }
        let config: OperatorConfig = figment
            .merge(Env::prefixed("SCALETIDE_").split("__"))
            .extract()
            .context("failed to extract operator configuration")?;
        config.validate().context("operator configuration is invalid")?;
        Ok(config)
    }
}

/// Loads [`AdapterConfig`] the same way as [`OperatorConfigLoader`].
pub struct AdapterConfigLoader;

impl AdapterConfigLoader {
    pub fn load(extra_file: Option<&std::path::Path>) -> Result<AdapterConfig> {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(AdapterConfig::default()))
            .merge(Yaml::file("/etc/scaletide/adapter.yaml"));
        if let Some(path) = extra_file {
            figment = figment.merge(Yaml::file(path));
        }
        let config: AdapterConfig = figment
            .merge(Env::prefixed("SCALETIDE_").split("__"))
            .extract()
            .context("failed to extract adapter configuration")?;
        config.validate().context("adapter configuration is invalid")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_load_without_any_file() {
        let config = Figment::new()
            .merge(Serialized::defaults(OperatorConfig::default()))
            .extract::<OperatorConfig>()
            .unwrap();
        assert_eq!(config.default_polling_interval_secs, 30);
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "default_polling_interval_secs: 15").unwrap();
        file.flush().unwrap();

        let config = Figment::new()
            .merge(Serialized::defaults(OperatorConfig::default()))
            .merge(Yaml::file(file.path()))
            .extract::<OperatorConfig>()
            .unwrap();
        assert_eq!(config.default_polling_interval_secs, 15);
    }

    #[test]
    fn env_override_wins_over_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "default_polling_interval_secs: 15").unwrap();
        file.flush().unwrap();

        temp_env::with_var("SCALETIDE_DEFAULT_POLLING_INTERVAL_SECS", Some("7"), || {
            let config = Figment::new()
                .merge(Serialized::defaults(OperatorConfig::default()))
                .merge(Yaml::file(file.path()))
                .merge(Env::prefixed("SCALETIDE_").split("__"))
                .extract::<OperatorConfig>()
                .unwrap();
            assert_eq!(config.default_polling_interval_secs, 7);
        });
    }

    #[test]
    fn invalid_operator_config_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "default_polling_interval_secs: 0").unwrap();
        file.flush().unwrap();
        assert!(OperatorConfigLoader::load(Some(file.path())).is_err());
    }

    #[test]
    fn invalid_adapter_config_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "cache_staleness_multiplier: 0.1").unwrap();
        file.flush().unwrap();
        assert!(AdapterConfigLoader::load(Some(file.path())).is_err());
    }
}
