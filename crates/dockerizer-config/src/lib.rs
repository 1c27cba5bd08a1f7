pub mod env;
pub mod error;
pub mod model;

pub use error::*;
pub use model::*;

use std::path::{Path, PathBuf};

/// 設定ファイルのパスを直接指定する環境変数
pub const ENV_CONFIG_PATH: &str = "DOCKERIZER_CONFIG_PATH";

const CANDIDATES: [&str; 3] = [
    "dockerizer.local.yaml",
    "dockerizer.yaml",
    ".dockerizer.yaml",
];

/// Dockerizer のグローバル設定ディレクトリを取得
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("dockerizer");

    Ok(config_dir)
}

/// 設定ファイルを探す
///
/// 以下の優先順位で設定ファイルを検索:
/// 1. 環境変数 DOCKERIZER_CONFIG_PATH (直接パス指定)
/// 2. カレントディレクトリ: dockerizer.local.yaml, dockerizer.yaml, .dockerizer.yaml
/// 3. ~/.config/dockerizer/config.yaml (グローバル設定)
///
/// どこにも見つからない場合は `Ok(None)`（デフォルト設定で動作する）
pub fn find_config_file() -> Result<Option<PathBuf>> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::ConfigFileNotFound(path));
    }

    // 2. カレントディレクトリで検索
    let current_dir = std::env::current_dir()?;
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    // 3. グローバル設定ファイル
    if let Ok(config_dir) = get_config_dir() {
        let global_config = config_dir.join("config.yaml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

/// 設定ファイルを読み込む（環境変数の上書きは行わない）
pub fn load_file(path: &Path) -> Result<DockerizerConfig> {
    if !path.exists() {
        return Err(ConfigError::ConfigFileNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(DockerizerConfig::default());
    }

    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// 設定を読み込む
///
/// `explicit` が指定されていればそのファイルを、なければ [`find_config_file`] の
/// 結果を使い、最後に環境変数で上書きする。
pub fn load(explicit: Option<&Path>) -> Result<DockerizerConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file()?,
    };

    let mut config = match &path {
        Some(path) => {
            tracing::debug!("Loading configuration from {}", path.display());
            load_file(path)?
        }
        None => {
            tracing::debug!("No configuration file found, using defaults");
            DockerizerConfig::default()
        }
    };

    config.apply_env_overrides()?;
    Ok(config)
}
