//! Configuration loading from disk.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::environment::{ConfigDataLoader, ConfigEnvironment, LoggingListener};
use crate::config::schema::TunnelConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config file '{}' not found", .0.display())]
    NotFound(PathBuf),

    #[error("Parse error in '{}': {source}", location.display())]
    Parse {
        location: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid profile name '{0}'")]
    InvalidProfile(String),

    #[error("Bind error: {0}")]
    Bind(toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, layer and validate configuration from a TOML file.
///
/// `profiles` are activated in addition to the file's `profiles.active`.
pub fn load_config(path: &Path, profiles: &[String]) -> Result<TunnelConfig, ConfigError> {
    let mut environment = ConfigEnvironment::new();
    ConfigDataLoader::new()
        .with_additional_profiles(profiles.iter().cloned())
        .apply(&mut environment, path, &mut LoggingListener)?;

    let config = environment.bind().map_err(ConfigError::Bind)?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_file_with_profile_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("tunnel.toml");
        std::fs::write(&base, "[server]\ntarget_port = 9229\n").unwrap();
        std::fs::write(
            dir.path().join("tunnel-remote.toml"),
            "[server]\nbind_address = \"127.0.0.1:9000\"\n",
        )
        .unwrap();

        let config = load_config(&base, &["remote".to_string()]).unwrap();
        assert_eq!(config.server.target_port, 9229);
        assert_eq!(config.server.bind_address, "127.0.0.1:9000");
        assert_eq!(config.profiles.active, vec!["remote"]);
    }

    #[test]
    fn missing_profile_overlay_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("tunnel.toml");
        std::fs::write(&base, "").unwrap();

        let config = load_config(&base, &["absent".to_string()]).unwrap();
        assert_eq!(config, TunnelConfig {
            profiles: crate::config::schema::ProfilesConfig {
                active: vec!["absent".to_string()],
            },
            ..TunnelConfig::default()
        });
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("nope.toml"), &[]).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn syntax_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("tunnel.toml");
        std::fs::write(&base, "[server\n").unwrap();

        let err = load_config(&base, &[]).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("tunnel.toml"));
    }

    #[test]
    fn wrong_types_fail_to_bind() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("tunnel.toml");
        std::fs::write(&base, "[server]\ntarget_port = \"debugger\"\n").unwrap();

        assert!(matches!(load_config(&base, &[]), Err(ConfigError::Bind(_))));
    }

    #[test]
    fn semantic_errors_are_all_reported() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("tunnel.toml");
        std::fs::write(
            &base,
            "[server]\ntarget_port = 0\nlong_poll_timeout_ms = 0\n",
        )
        .unwrap();

        match load_config(&base, &[]) {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation errors, got {other:?}"),
        }
    }
}
