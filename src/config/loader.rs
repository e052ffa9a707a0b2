//! TOML configuration loading and env-var overrides.
//!
//! # Loading order
//! 1. Parse `~/.anteroom/config.toml` (or the path in `ANTEROOM_CONFIG`)
//! 2. Apply `ANTEROOM_*` environment variable overrides
//! 3. Fall back to [`AppConfig::default()`] if the file is missing

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use super::schema::AppConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

// ─── default_config_path ─────────────────────────────────────────────────────

/// Return the default config file path: `~/.anteroom/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".anteroom").join("config.toml"))
}

// ─── load_config ─────────────────────────────────────────────────────────────

/// Load [`AppConfig`] from the given path, falling back to defaults if the
/// file does not exist, then applying environment variable overrides.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let mut config = match fs::read_to_string(path) {
        Ok(content) => toml::from_str::<AppConfig>(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load config from `ANTEROOM_CONFIG` or the default path, ignoring errors.
pub fn load_default_config() -> AppConfig {
    let path = env::var("ANTEROOM_CONFIG")
        .map(PathBuf::from)
        .ok()
        .or_else(default_config_path)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    load_config(&path).unwrap_or_default()
}

// ─── apply_env_overrides ─────────────────────────────────────────────────────

/// Apply `ANTEROOM_*` environment variable overrides to `config`.
///
/// Supported overrides:
/// - `ANTEROOM_BASE_URL`        → `ai.base_url`
/// - `ANTEROOM_MODEL`           → `ai.model`
/// - `ANTEROOM_API_KEY`         → `ai.api_key`
/// - `ANTEROOM_APPROVAL_MODE`   → `safety.approval_mode`
/// - `ANTEROOM_SAFETY_ENABLED`  → `safety.enabled` (1/0)
fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(v) = env::var("ANTEROOM_BASE_URL") {
        config.ai.base_url = v;
    }
    if let Ok(v) = env::var("ANTEROOM_MODEL") {
        config.ai.model = v;
    }
    if let Ok(v) = env::var("ANTEROOM_API_KEY") {
        config.ai.api_key = v;
    }
    if let Ok(v) = env::var("ANTEROOM_APPROVAL_MODE") {
        config.safety.approval_mode = v;
    }
    if let Ok(v) = env::var("ANTEROOM_SAFETY_ENABLED") {
        config.safety.enabled = v == "1" || v.eq_ignore_ascii_case("true");
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unsafe_code)] // env::set_var / remove_var are unsafe in Rust 2024; tests are single-threaded.
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nonexistent.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn load_partial_config_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[ai]
model = "gpt-4o"
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.ai.model, "gpt-4o");
        // Other fields should use defaults.
        assert_eq!(config.ai.request_timeout_secs, 120);
        assert_eq!(config.safety.approval_mode, "ask_for_writes");
        assert_eq!(config.agent.max_iterations, 50);
    }

    #[test]
    fn load_full_config() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[ai]
base_url = "http://localhost:11434/v1"
model = "llama3"
request_timeout_secs = 30

[safety]
approval_mode = "auto"
allowed_tools = ["read_file"]
denied_tools = ["bash"]
approval_timeout_secs = 60

[safety.bash]
enabled = false

[safety.subagent]
max_concurrent = 2
max_total = 4

[agent]
max_iterations = 10
narration_cadence = 5

[cli]
max_retries = 1
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.ai.base_url, "http://localhost:11434/v1");
        assert_eq!(config.safety.approval_mode, "auto");
        assert_eq!(config.safety.allowed_tools, vec!["read_file"]);
        assert_eq!(config.safety.denied_tools, vec!["bash"]);
        assert!(!config.safety.bash.enabled);
        assert_eq!(config.safety.subagent.max_total, 4);
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.agent.narration_cadence, 5);
        assert_eq!(config.cli.max_retries, 1);
    }

    #[test]
    fn load_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "this is not valid toml!!!");
        let result = load_config(&path);
        assert!(result.is_err(), "invalid TOML should return an error");
    }

    #[test]
    fn env_override_model() {
        let key = "ANTEROOM_MODEL";
        // SAFETY: single-threaded test context; no other threads read this var.
        unsafe {
            env::set_var(key, "gpt-4o-mini-override");
        }
        let config = load_default_config();
        // SAFETY: same as set_var above.
        unsafe {
            env::remove_var(key);
        }
        assert_eq!(config.ai.model, "gpt-4o-mini-override");
    }

    #[test]
    fn env_override_safety_enabled_false() {
        let key = "ANTEROOM_SAFETY_ENABLED";
        // SAFETY: single-threaded test context; no other threads read this var.
        unsafe {
            env::set_var(key, "0");
        }
        let config = load_default_config();
        // SAFETY: same as set_var above.
        unsafe {
            env::remove_var(key);
        }
        assert!(!config.safety.enabled);
    }
}
