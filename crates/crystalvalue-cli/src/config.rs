//! CLI configuration loading

use crystalvalue_sdk::PipelineConfig;
use std::path::Path;

/// Config file looked up when no path is given
const DEFAULT_CONFIG_FILE: &str = "config/crystalvalue";

/// Prefix of environment overrides (`CRYSTALVALUE__DATASET_ID`,
/// `CRYSTALVALUE__API__ACCESS_TOKEN`, ...)
const ENV_PREFIX: &str = "CRYSTALVALUE";

/// Load the pipeline configuration from `.env`, the config file and the
/// environment, later sources overriding earlier ones
pub fn load(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    // Load .env file if exists
    dotenvy::dotenv().ok();
    load_from(path, environment())
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("ignore_columns")
}

fn load_from(path: Option<&Path>, env: config::Environment) -> anyhow::Result<PipelineConfig> {
    let file = match path {
        Some(path) => config::File::from(path).required(true),
        None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };

    let settings = config::Config::builder()
        .add_source(file)
        .add_source(env)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to read config: {}", e))?;

    let pipeline: PipelineConfig = settings
        .try_deserialize()
        .map_err(|e| anyhow::anyhow!("Failed to deserialize config: {}", e))?;
    pipeline.validate()?;
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(map))
    }

    #[test]
    fn test_load_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crystalvalue.yaml");
        std::fs::write(
            &path,
            r#"
project_id: my-project
dataset_id: ltv
value_column: revenue
days_lookahead: 180
features_types:
  numeric: [revenue]
  string_or_categorical: [channel]
"#,
        )
        .unwrap();

        let config = load_from(Some(&path), env(&[])).unwrap();

        assert_eq!(config.project_id, "my-project");
        assert_eq!(config.value_column, "revenue");
        assert_eq!(config.days_lookback, 365);
        assert_eq!(config.days_lookahead, 180);
        assert_eq!(
            config.features_types.unwrap().string_or_categorical,
            vec!["channel"]
        );
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crystalvalue.yaml");
        std::fs::write(&path, "project_id: my-project\ndataset_id: ltv\n").unwrap();

        let config = load_from(
            Some(&path),
            env(&[
                ("CRYSTALVALUE__DATASET_ID", "ltv_eu"),
                ("CRYSTALVALUE__DAYS_LOOKBACK", "90"),
                ("CRYSTALVALUE__API__ACCESS_TOKEN", "token"),
            ]),
        )
        .unwrap();

        assert_eq!(config.dataset_id, "ltv_eu");
        assert_eq!(config.days_lookback, 90);
        assert_eq!(config.api.access_token.as_deref(), Some("token"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        assert!(load_from(Some(&path), env(&[])).is_err());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crystalvalue.yaml");
        std::fs::write(&path, "project_id: my-project\ndataset_id: ltv\ndays_lookback: 0\n")
            .unwrap();

        let err = load_from(Some(&path), env(&[])).unwrap_err();
        assert!(err.to_string().contains("days_lookback"));
    }
}
