use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error("設定ファイルが見つかりません: {0}")]
    ConfigFileNotFound(std::path::PathBuf),

    #[error("設定ファイルの解析に失敗しました ({path}): {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("環境変数 {name} の値が不正です: {message}")]
    InvalidEnv { name: String, message: String },

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
