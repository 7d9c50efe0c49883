//! Configuration loading
//!
//! A TOML or YAML file supplies the configuration; `ORACLE__`-prefixed
//! environment variables override individual keys, with `__` separating
//! nested fields (`ORACLE__CHAIN__RPC_URL`).

use anyhow::{Context, Result};
use config as config_rs;
use config_rs::{Environment, File, Source};
use std::path::{Path, PathBuf};

use oracle_core::OracleConfig;

const DEFAULT_CONFIG_PATH: &str = "config/oracle.toml";

/// Config path from the first CLI argument, then `ORACLE_CONFIG`, then the default
pub fn config_path(arg: Option<String>) -> PathBuf {
    arg.or_else(|| std::env::var("ORACLE_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
        .into()
}

fn environment() -> Environment {
    Environment::with_prefix("ORACLE")
        .separator("__")
        .try_parsing(true)
}

/// Load and validate the configuration file at `path`
pub fn load(path: &Path) -> Result<OracleConfig> {
    build(File::from(path), environment())
        .with_context(|| format!("loading configuration from {}", path.display()))
}

fn build<F>(file: F, env: Environment) -> Result<OracleConfig>
where
    F: Source + Send + Sync + 'static,
{
    let config: OracleConfig = config_rs::Config::builder()
        .add_source(file)
        .add_source(env)
        .build()?
        .try_deserialize()?;

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_rs::FileFormat;
    use oracle_core::{PartialPublicationPolicy, TokenId};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    const TOML: &str = r#"
        [chain]
        rpc_url = "http://node:8545"
        registry = "0x00000000000000000000000000000000000000cc"
        partial_policy = "price_feed_sufficient"

        [gate]
        deviation_threshold = 0.01
        max_staleness_secs = 1800

        [[tokens]]
        id = "WETH"
        address = "0x00000000000000000000000000000000000000aa"
        price_feed = "0x00000000000000000000000000000000000000bb"
        sources = [
            { id = "alpha", endpoint = "https://alpha.example.com" },
            { id = "beta", endpoint = "https://beta.example.com" },
        ]
    "#;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(map))
    }

    #[test]
    fn test_load_from_toml() {
        let config = build(File::from_str(TOML, FileFormat::Toml), env(&[])).unwrap();

        assert_eq!(config.chain.rpc_url, "http://node:8545");
        assert_eq!(
            config.chain.partial_policy,
            PartialPublicationPolicy::PriceFeedSufficient
        );
        assert_eq!(config.gate.deviation_threshold, dec!(0.01));
        assert_eq!(config.gate.max_staleness_secs, 1800);
        // Unset sections fall back to defaults
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.chain.gas_limit, 2_000_000);

        let weth = config.token(&TokenId::new("WETH")).unwrap();
        assert_eq!(weth.sources.len(), 2);
    }

    #[test]
    fn test_environment_overrides_file() {
        let config = build(
            File::from_str(TOML, FileFormat::Toml),
            env(&[
                ("ORACLE__CHAIN__RPC_URL", "http://other:8545"),
                ("ORACLE__RETRY__MAX_RETRIES", "5"),
            ]),
        )
        .unwrap();

        assert_eq!(config.chain.rpc_url, "http://other:8545");
        assert_eq!(config.retry.max_retries, 5);
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        let no_tokens = r#"
            [chain]
            rpc_url = "http://node:8545"
        "#;
        assert!(build(File::from_str(no_tokens, FileFormat::Toml), env(&[])).is_err());
    }

    #[test]
    fn test_config_path_prefers_argument() {
        assert_eq!(
            config_path(Some("custom.toml".to_string())),
            PathBuf::from("custom.toml")
        );
    }
}
