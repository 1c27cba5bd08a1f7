//! Dockerizer のイメージビルドパイプライン
//!
//! ジョブのソースコードを取得し、Dockerfile を生成してビルドし、
//! 内部レジストリへプッシュするまでを1本のパイプラインとして実行します。
//! 進捗ログはバッチにまとめてログシンクへ送ります。

pub mod auth;
pub mod collaborators;
pub mod context;
pub mod daemon;
pub mod docker;
pub mod ecr;
pub mod error;
pub mod log_stream;
pub mod orchestrator;
pub mod recipe;
pub mod spec;

pub use auth::{AuthReport, CredentialResolver, PhaseResult, RegistryCredential, TokenExchange};
pub use collaborators::{
    CodeFetcher, LogBatch, LogSink, TaskDispatcher, TaskMessage, VersionControl,
};
pub use context::ContextBuilder;
pub use daemon::{BuildRequest, ImageDaemon, ProgressStream};
pub use docker::DockerDaemon;
pub use ecr::EcrTokenExchange;
pub use error::{BuildError, BuildResult, DaemonError};
pub use log_stream::{LogBatcher, ProgressRecord, StreamFailure, StreamOutcome};
pub use orchestrator::{BuildOrchestrator, Collaborators};
pub use recipe::{DependencyFiles, RecipeRenderer};
pub use spec::{BuildOutcome, BuildSpec, CodeReference, ImageReference, JobStatus, RepoLocation};
