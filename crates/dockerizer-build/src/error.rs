use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Code reference for build job {0} does not have any repo")]
    MissingCodeReference(String),

    #[error("Build context directory not found: {0}")]
    ContextNotFound(PathBuf),

    #[error("Docker connection error: {0}")]
    DockerConnection(#[from] bollard::errors::Error),

    #[error("Registry authentication failed for {registry}: {message}")]
    AuthFailed { registry: String, message: String },

    #[error("Failed to render Dockerfile: {0}")]
    Render(#[from] tera::Error),

    #[error("Failed to checkout {commit} in {path}: {message}")]
    Checkout {
        path: PathBuf,
        commit: String,
        message: String,
    },

    #[error("Failed to download code: {0}")]
    Download(String),

    #[error("Failed to dispatch task {task}: {message}")]
    Dispatch { task: String, message: String },

    #[error("Invalid build configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::MissingCodeReference(job) => {
                format!(
                    "ビルドジョブ {} にコードの参照先がありません\n\
                     \n\
                     code_reference に repo または external_repo の download_url を指定してください。",
                    job
                )
            }
            BuildError::ContextNotFound(path) => {
                format!(
                    "ビルドコンテキストが見つかりません: {}\n\
                     \n\
                     repo_path の親ディレクトリが存在するか確認してください。",
                    path.display()
                )
            }
            BuildError::Render(e) => {
                format!(
                    "Dockerfileのレンダリングに失敗しました: {}\n\
                     \n\
                     build_steps と env_vars の内容を確認してください。",
                    e
                )
            }
            _ => format!("{}", self),
        }
    }
}

/// Docker デーモンとの通信エラー（ストリーム上のトランスポートエラーを含む）
#[derive(Debug, Clone, Error)]
pub enum DaemonError {
    #[error("Docker API error: {0}")]
    Api(String),

    #[error("Failed to prepare build context: {0}")]
    Context(String),

    #[error("Login to {registry} failed: {message}")]
    Login { registry: String, message: String },
}

impl From<bollard::errors::Error> for DaemonError {
    fn from(e: bollard::errors::Error) -> Self {
        DaemonError::Api(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
pub type BuildResult<T> = Result<T>;
