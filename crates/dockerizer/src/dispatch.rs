//! タスク送信とログの送り先

use async_trait::async_trait;
use colored::Colorize;
use dockerizer_build::collaborators::TASK_HANDLE_BUILD_JOB_LOGS;
use dockerizer_build::{BuildError, BuildResult, LogBatch, LogSink, TaskDispatcher, TaskMessage};
use serde_json::json;
use std::sync::Arc;

/// タスクを JSON で POST する
pub struct HttpTaskDispatcher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTaskDispatcher {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl TaskDispatcher for HttpTaskDispatcher {
    async fn send_task(&self, message: TaskMessage) -> BuildResult<()> {
        let dispatch_failed = |reason: String| BuildError::Dispatch {
            task: message.task.clone(),
            message: reason,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&message)
            .send()
            .await
            .map_err(|e| dispatch_failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(dispatch_failed(format!(
                "{} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        tracing::debug!("Dispatched task {}", message.task);
        Ok(())
    }
}

/// 送信先がない場合はログに残すだけ
#[derive(Debug, Default, Clone)]
pub struct LoggingTaskDispatcher;

#[async_trait]
impl TaskDispatcher for LoggingTaskDispatcher {
    async fn send_task(&self, message: TaskMessage) -> BuildResult<()> {
        tracing::info!(task = %message.task, kwargs = %message.kwargs, "Task not dispatched (no endpoint)");
        Ok(())
    }
}

/// ログバッチを `logs_handle_build_job` タスクとして送る
pub struct TaskLogSink {
    dispatcher: Arc<dyn TaskDispatcher>,
}

impl TaskLogSink {
    pub fn new(dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        Self { dispatcher }
    }
}

pub fn log_task(batch: LogBatch) -> TaskMessage {
    TaskMessage::new(
        TASK_HANDLE_BUILD_JOB_LOGS,
        json!({
            "job_uuid": batch.job_uuid,
            "job_name": batch.job_name,
            "log_lines": batch.log_lines,
        }),
    )
}

#[async_trait]
impl LogSink for TaskLogSink {
    async fn publish(&self, batch: LogBatch) -> BuildResult<()> {
        self.dispatcher.send_task(log_task(batch)).await
    }
}

/// ログを標準出力に表示する
#[derive(Debug, Default, Clone)]
pub struct ConsoleLogSink;

#[async_trait]
impl LogSink for ConsoleLogSink {
    async fn publish(&self, batch: LogBatch) -> BuildResult<()> {
        for line in &batch.log_lines {
            let colored = if line.starts_with("Build Error") {
                line.red().bold()
            } else if line.starts_with("JSON decode error") {
                line.yellow()
            } else if line.starts_with("Push") {
                line.cyan()
            } else {
                line.normal()
            };
            println!("{} {}", format!("[{}]", batch.job_name).dimmed(), colored);
        }
        Ok(())
    }
}
