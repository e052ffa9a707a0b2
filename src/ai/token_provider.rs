//! Token provider: obtain and refresh API keys via an external command.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::info;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum TokenProviderError {
    #[error("api_key_command is empty")]
    EmptyCommand,
    #[error("api_key_command failed to start: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("api_key_command timed out after 30s")]
    Timeout,
    #[error("api_key_command exited with code {code}{stderr}")]
    NonZeroExit { code: i32, stderr: String },
    #[error("api_key_command returned empty output")]
    EmptyOutput,
}

/// Runs an external command to obtain an API key, with caching and refresh.
///
/// The command string is split on whitespace; no shell is involved.
pub struct TokenProvider {
    command: String,
    cached: Mutex<Option<String>>,
}

impl TokenProvider {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cached: Mutex::new(None),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Return the cached token, or fetch a new one if no cache exists.
    pub async fn token(&self) -> Result<String, TokenProviderError> {
        if let Some(token) = self.cached.lock().await.clone() {
            return Ok(token);
        }
        self.refresh().await
    }

    /// Execute the command and return a fresh token, replacing the cache.
    pub async fn refresh(&self) -> Result<String, TokenProviderError> {
        info!("running api_key_command to obtain token");
        let mut parts = self.command.split_whitespace();
        let program = parts.next().ok_or(TokenProviderError::EmptyCommand)?;

        let child = Command::new(program)
            .args(parts)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(TokenProviderError::Spawn)?;

        let output = tokio::time::timeout(COMMAND_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| TokenProviderError::Timeout)?
            .map_err(TokenProviderError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(TokenProviderError::NonZeroExit {
                code: output.status.code().unwrap_or(-1),
                stderr: if stderr.is_empty() {
                    String::new()
                } else {
                    format!(": {stderr}")
                },
            });
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(TokenProviderError::EmptyOutput);
        }

        *self.cached.lock().await = Some(token.clone());
        info!("token obtained successfully");
        Ok(token)
    }

    pub async fn clear_cache(&self) {
        *self.cached.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetches_and_caches_token() {
        let provider = TokenProvider::new("echo secret-token");
        assert_eq!(provider.token().await.unwrap(), "secret-token");
        // Second call uses the cache (same value without re-running).
        assert_eq!(provider.token().await.unwrap(), "secret-token");
    }

    #[tokio::test]
    async fn refresh_replaces_cache() {
        let provider = TokenProvider::new("echo fresh");
        provider.token().await.unwrap();
        assert_eq!(provider.refresh().await.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn empty_output_is_an_error() {
        let provider = TokenProvider::new("true");
        assert!(matches!(
            provider.token().await,
            Err(TokenProviderError::EmptyOutput)
        ));
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error() {
        let provider = TokenProvider::new("false");
        assert!(matches!(
            provider.token().await,
            Err(TokenProviderError::NonZeroExit { .. })
        ));
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let provider = TokenProvider::new("definitely-not-a-real-binary-xyz");
        assert!(matches!(
            provider.token().await,
            Err(TokenProviderError::Spawn(_))
        ));
    }
}
