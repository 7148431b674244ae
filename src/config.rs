//! CLI 参数、默认值与 token 配置文件加载。

use clap::Parser;
use serde::Deserialize;
use shadow_rs::formatcp;
use std::fmt;
use std::io;
use std::path::Path;
use tokio::fs;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const DEFAULT_STORAGE_DIR: &str = "data";
pub const DEFAULT_HTTP_PORT: u16 = 8082;
pub const UPLOAD_PATH_HEADER: &str = "x-formfile-path";
pub const UPLOAD_FIELD_NAME: &str = "file";

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "file-depot", version = VERSION_INFO, about = "Token-gated HTTP file store")]
pub struct Args {
    #[arg(
        short = 'c',
        long,
        env = "DEPOT_CONFIG",
        default_value = DEFAULT_CONFIG_PATH,
        help = "JSON file holding the access token"
    )]
    pub config: String,
    #[arg(
        short = 's',
        long,
        env = "DEPOT_STORAGE_DIR",
        default_value = DEFAULT_STORAGE_DIR,
        help = "Storage directory for files"
    )]
    pub storage_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "DEPOT_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "DEPOT_PORT",
        default_value_t = DEFAULT_HTTP_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(long, env = "DEPOT_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "DEPOT_PROTECT_DOWNLOAD",
        help = "Require the access token on /get downloads"
    )]
    pub protect_download: bool,
    #[arg(
        long,
        env = "DEPOT_ATOMIC_UPLOAD",
        help = "Stage uploads in a temp file and rename into place"
    )]
    pub atomic_upload: bool,
}

/// token 配置文件内容。
#[derive(Deserialize, Debug)]
pub struct TokenConfig {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(serde_json::Error),
    EmptyToken,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "failed to read config file: {err}"),
            ConfigError::Parse(err) => write!(f, "failed to parse config file: {err}"),
            ConfigError::EmptyToken => f.write_str("config file has an empty token"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

impl From<ConfigError> for io::Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}

/// 从配置文件读取 token，缺失、格式错误或空 token 都视为失败。
pub async fn load_token_config(path: &Path) -> Result<TokenConfig, ConfigError> {
    let data = fs::read(path).await?;
    let config: TokenConfig = serde_json::from_slice(&data)?;
    if config.token.is_empty() {
        return Err(ConfigError::EmptyToken);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn loads_token_from_json_file() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("config.json");
        std::fs::write(&path, br#"{"token": "s3cret"}"#).expect("write config");

        let config = load_token_config(&path).await.expect("load config");
        assert_eq!(config.token, "s3cret");
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let temp = tempdir().expect("tempdir");
        let result = load_token_config(&temp.path().join("absent.json")).await;
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[tokio::test]
    async fn malformed_file_is_parse_error() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("config.json");
        std::fs::write(&path, b"token = nope").expect("write config");

        let result = load_token_config(&path).await;
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[tokio::test]
    async fn missing_token_field_is_rejected() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("config.json");
        std::fs::write(&path, b"{}").expect("write config");

        let result = load_token_config(&path).await;
        assert!(matches!(result, Err(ConfigError::EmptyToken)));
    }

    #[test]
    fn defaults_match_fixed_layout() {
        let args = Args::parse_from(["file-depot"]);
        assert_eq!(args.config, DEFAULT_CONFIG_PATH);
        assert_eq!(args.storage_dir, DEFAULT_STORAGE_DIR);
        assert_eq!(args.port, DEFAULT_HTTP_PORT);
        assert!(!args.protect_download);
        assert!(!args.atomic_upload);
    }
}
