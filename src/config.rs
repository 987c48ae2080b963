use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// The structure of our configuration file (config.toml).
///
/// Every field can be overridden from the environment, see [`Config::apply_env`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Bearer secret required by `/download`. Unset means every request is refused.
    pub auth_token: Option<String>,
    pub cookie_path: String,
    pub data_dir: PathBuf,
    pub public_base_url: String,
    pub token_ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            auth_token: None,
            cookie_path: "/config/cookies.txt".to_string(),
            data_dir: PathBuf::from("/data"),
            public_base_url: "https://yt.micr.dev".to_string(),
            token_ttl_seconds: 900,
            sweep_interval_seconds: 60,
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Config {
    /// The configured secret, with empty or whitespace-only values treated as unset.
    pub fn secret(&self) -> Option<&str> {
        self.auth_token
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }

    /// Public link for a redeemable token.
    pub fn file_url(&self, token: &str) -> String {
        format!("{}/file/{}", self.public_base_url.trim_end_matches('/'), token)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Applies overrides using `lookup` as the variable source.
    ///
    /// Taking a closure keeps the tests away from the real process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("YTDLP_TOKEN") {
            self.auth_token = Some(v);
        }
        if let Some(v) = lookup("COOKIE_PATH") {
            self.cookie_path = v;
        }
        if let Some(v) = lookup("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PUBLIC_BASE_URL") {
            self.public_base_url = v;
        }
        if let Some(v) = lookup("TOKEN_TTL_SECONDS") {
            self.token_ttl_seconds = parse_var("TOKEN_TTL_SECONDS", &v)?;
        }
        if let Some(v) = lookup("SWEEP_INTERVAL_SECONDS") {
            self.sweep_interval_seconds = parse_var("SWEEP_INTERVAL_SECONDS", &v)?;
        }
        if let Some(v) = lookup("YTDLP_PATH") {
            self.ytdlp_path = v;
        }
        if let Some(v) = lookup("FFMPEG_PATH") {
            self.ffmpeg_path = v;
        }
        if let Some(v) = lookup("HOST") {
            self.host = v;
        }
        if let Some(v) = lookup("PORT") {
            self.port = parse_var("PORT", &v)?;
        }
        self.public_base_url = self.public_base_url.trim_end_matches('/').to_string();
        Ok(())
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow!("Invalid value for {}: {:?} ({})", name, value, e))
}

/// Returns the cross-platform path to the configuration file, creating the directory if needed.
async fn default_config_path() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("dev", "micr", "yt-relay")
        .ok_or_else(|| anyhow!("Could not find a valid home directory to store config"))?;

    let config_dir = project_dirs.config_dir();
    fs::create_dir_all(config_dir).await?;

    Ok(config_dir.join("config.toml"))
}

/// Loads the configuration and applies environment overrides.
///
/// With no explicit path, the platform config file is used and a default one is written
/// if it doesn't exist yet. An explicit path must exist.
pub async fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = match explicit {
        Some(path) => read_config(path).await?,
        None => {
            let config_path = default_config_path().await?;
            if config_path.exists() {
                read_config(&config_path).await?
            } else {
                tracing::info!(
                    "No config file found. Creating a default one at: {}",
                    config_path.display()
                );
                let default_config = Config::default();
                save_config(&config_path, &default_config).await?;
                default_config
            }
        }
    };

    config.apply_env(|name| std::env::var(name).ok())?;
    Ok(config)
}

async fn read_config(path: &Path) -> Result<Config> {
    let config_content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    toml::from_str(&config_content)
        .map_err(|e| anyhow!("Failed to parse config file at {}: {}", path.display(), e))
}

/// Saves the provided configuration object to the file.
pub async fn save_config(path: &Path, config: &Config) -> Result<()> {
    let toml_string = toml::to_string_pretty(config)?;
    fs::write(path, toml_string).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_deployment() {
        let config = Config::default();
        assert_eq!(config.token_ttl_seconds, 900);
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.cookie_path, "/config/cookies.txt");
        assert!(config.secret().is_none());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("YTDLP_TOKEN", "s3cret"),
                ("DATA_DIR", "/tmp/relay"),
                ("PUBLIC_BASE_URL", "https://relay.example/"),
                ("TOKEN_TTL_SECONDS", "30"),
                ("PORT", "9000"),
            ]))
            .unwrap();

        assert_eq!(config.secret(), Some("s3cret"));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/relay"));
        assert_eq!(config.token_ttl(), Duration::from_secs(30));
        assert_eq!(config.bind_addr(), "127.0.0.1:9000");
        assert_eq!(config.file_url("abc"), "https://relay.example/file/abc");
    }

    #[test]
    fn bad_numeric_env_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("TOKEN_TTL_SECONDS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("TOKEN_TTL_SECONDS"));
    }

    #[test]
    fn blank_secret_counts_as_unset() {
        let config = Config {
            auth_token: Some("   ".to_string()),
            ..Config::default()
        };
        assert!(config.secret().is_none());
    }

    #[tokio::test]
    async fn explicit_file_is_read_and_partial_tables_fill_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "auth_token = \"abc\"\ntoken_ttl_seconds = 5\n")
            .await
            .unwrap();

        let config = read_config(&path).await.unwrap();
        assert_eq!(config.secret(), Some("abc"));
        assert_eq!(config.token_ttl_seconds, 5);
        assert_eq!(config.ffmpeg_path, "ffmpeg");
    }

    #[tokio::test]
    async fn saved_config_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config {
            port: 1234,
            ..Config::default()
        };
        save_config(&path, &config).await.unwrap();
        assert_eq!(read_config(&path).await.unwrap(), config);
    }
}
