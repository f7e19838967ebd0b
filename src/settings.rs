use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::authz::registry::DEFAULT_MAX_RULE_DEPTH;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub policies: Policies,
    pub store: Store,
    pub engine: Engine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policies {
    /// Directory of `.kdl` policy files. Default: policies
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Store {
    /// JSON file of seed documents, keyed by entity type
    pub seed_file: Option<PathBuf>,
    /// Write the in-memory stores back to `seed_file` after a mutation
    #[serde(default)]
    pub persist: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engine {
    /// How deeply computed rules may re-enter the engine
    #[serde(default = "default_max_rule_depth")]
    pub max_rule_depth: usize,
    /// Actions added to the verb table on top of create/view/edit/delete
    #[serde(default)]
    pub custom_actions: Vec<String>,
}

fn default_max_rule_depth() -> usize {
    DEFAULT_MAX_RULE_DEPTH
}

impl Default for Policies {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("policies"),
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            max_rule_depth: default_max_rule_depth(),
            custom_actions: Vec::new(),
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default(
                "policies.dir",
                Policies::default().dir.to_string_lossy().to_string(),
            )
            .into_diagnostic()?
            .set_default("store.persist", false)
            .into_diagnostic()?
            .set_default("engine.max_rule_depth", default_max_rule_depth() as i64)
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: CANOPY__ENGINE__MAX_RULE_DEPTH=4, etc.
        builder = builder.add_source(config::Environment::with_prefix("CANOPY").separator("__"));

        let cfg = builder.build().into_diagnostic()?;
        let mut s: Settings = cfg.try_deserialize().into_diagnostic()?;

        // Normalize paths to be relative to current dir
        if s.policies.dir.is_relative() {
            s.policies.dir = std::env::current_dir().into_diagnostic()?.join(&s.policies.dir);
        }
        if let Some(seed) = s.store.seed_file.as_mut() {
            if seed.is_relative() {
                *seed = std::env::current_dir().into_diagnostic()?.join(&*seed);
            }
        }

        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_settings_load_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("nonexistent.toml");

        let settings =
            Settings::load(config_path.to_str().unwrap()).expect("Failed to load settings");

        assert!(settings.policies.dir.ends_with("policies"));
        assert!(settings.store.seed_file.is_none());
        assert!(!settings.store.persist);
        assert!(settings.engine.custom_actions.is_empty());
    }

    #[test]
    fn test_settings_load_from_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        let config_content = r#"
[policies]
dir = "/etc/canopy/policies"

[store]
seed_file = "/var/lib/canopy/documents.json"
persist = true

[engine]
custom_actions = ["publish", "archive"]
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        let settings =
            Settings::load(config_path.to_str().unwrap()).expect("Failed to load settings");

        assert_eq!(settings.policies.dir, PathBuf::from("/etc/canopy/policies"));
        assert_eq!(
            settings.store.seed_file,
            Some(PathBuf::from("/var/lib/canopy/documents.json"))
        );
        assert!(settings.store.persist);
        assert_eq!(settings.engine.custom_actions, vec!["publish", "archive"]);
    }

    #[test]
    fn test_settings_env_override() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        fs::write(&config_path, "[engine]\nmax_rule_depth = 3\n").expect("Failed to write config");

        // Environment should override the file
        env::set_var("CANOPY__ENGINE__MAX_RULE_DEPTH", "7");

        let settings =
            Settings::load(config_path.to_str().unwrap()).expect("Failed to load settings");

        assert_eq!(settings.engine.max_rule_depth, 7);

        env::remove_var("CANOPY__ENGINE__MAX_RULE_DEPTH");
    }

    #[test]
    fn test_settings_path_normalization() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        let config_content = r#"
[policies]
dir = "relative/policies"

[store]
seed_file = "relative/documents.json"
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        let settings =
            Settings::load(config_path.to_str().unwrap()).expect("Failed to load settings");

        assert!(settings.policies.dir.is_absolute());
        assert!(settings.policies.dir.ends_with("relative/policies"));
        let seed = settings.store.seed_file.unwrap();
        assert!(seed.is_absolute());
        assert!(seed.ends_with("relative/documents.json"));
    }

    #[test]
    fn test_engine_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.engine.max_rule_depth, DEFAULT_MAX_RULE_DEPTH);
        assert_eq!(default_max_rule_depth(), 10);
    }
}
