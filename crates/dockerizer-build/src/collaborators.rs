//! 外部コラボレータのインターフェース
//!
//! ソースコードの取得、バージョン管理、非同期タスクの送信、ログの送り先。
//! パイプラインはこれらのトレイトにのみ依存し、具体的な実装は呼び出し側が注入する。

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

/// Dockerfile のレンダリング結果をスケジューラに通知するタスク
pub const TASK_SET_DOCKERFILE: &str = "build_jobs_set_dockerfile";
/// ビルドジョブの最終ステータスをイベントシステムに送るタスク
pub const TASK_HANDLE_BUILD_JOB_STATUSES: &str = "events_handle_build_job_statuses";
/// ビルドログを送るタスク
pub const TASK_HANDLE_BUILD_JOB_LOGS: &str = "logs_handle_build_job";

/// ソースアーカイブを取得して展開する
#[async_trait]
pub trait CodeFetcher: Send + Sync {
    /// `url` からダウンロードし `destination` に展開する
    ///
    /// # Returns
    /// * `Ok(Some(path))` - 展開に成功した場合
    /// * `Ok(None)` - アーカイブが存在しなかった場合
    async fn fetch(&self, url: &str, destination: &Path) -> Result<Option<PathBuf>>;
}

/// ソースツリーを特定のコミットに切り替える
#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn checkout(&self, repo_path: &Path, commit: &str) -> Result<()>;
}

/// 名前付きタスクの送信（送りっぱなし）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskMessage {
    pub task: String,
    pub kwargs: Value,
}

impl TaskMessage {
    pub fn new(task: impl Into<String>, kwargs: Value) -> Self {
        Self {
            task: task.into(),
            kwargs,
        }
    }

    pub fn set_dockerfile(job_uuid: &str, dockerfile: &str) -> Self {
        Self::new(
            TASK_SET_DOCKERFILE,
            json!({ "build_job_uuid": job_uuid, "dockerfile": dockerfile }),
        )
    }
}

#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn send_task(&self, message: TaskMessage) -> Result<()>;
}

/// ログの1バッチ。行の順序は生成順のまま
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogBatch {
    pub job_uuid: String,
    pub job_name: String,
    pub log_lines: Vec<String>,
}

/// ビルドログの送り先。受信確認は待たない
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn publish(&self, batch: LogBatch) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_dockerfile_message() {
        let message = TaskMessage::set_dockerfile("abc", "FROM alpine");
        assert_eq!(message.task, TASK_SET_DOCKERFILE);
        assert_eq!(message.kwargs["build_job_uuid"], "abc");
        assert_eq!(message.kwargs["dockerfile"], "FROM alpine");
    }
}
