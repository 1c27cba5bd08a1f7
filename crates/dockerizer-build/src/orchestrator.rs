//! ビルドパイプライン
//!
//! 1つの BuildSpec について fetch → authenticate → 存在確認 → checkout → render →
//! build → push → cleanup を順番に実行します。各ステージは前のステージの完了を待ち、
//! リトライは行いません（再試行する場合はパイプライン全体をやり直す）。

use crate::auth::{AuthReport, CredentialResolver, PhaseResult, TokenExchange};
use crate::collaborators::{
    CodeFetcher, LogSink, TASK_HANDLE_BUILD_JOB_STATUSES, TaskDispatcher, TaskMessage,
    VersionControl,
};
use crate::daemon::{BuildRequest, ImageDaemon};
use crate::error::Result;
use crate::log_stream::{LogBatcher, StreamOutcome};
use crate::recipe::RecipeRenderer;
use crate::spec::{BuildOutcome, BuildSpec, ImageReference, JobStatus};
use dockerizer_config::DockerizerConfig;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

pub const DOWNLOAD_FAILED_MESSAGE: &str = "Could not download code to build the image.";
pub const PUSH_FAILED_MESSAGE: &str = "The docker image could not be pushed.";

/// パイプラインが使う外部コラボレータ一式
#[derive(Clone)]
pub struct Collaborators {
    pub daemon: Arc<dyn ImageDaemon>,
    pub fetcher: Arc<dyn CodeFetcher>,
    pub vcs: Arc<dyn VersionControl>,
    pub dispatcher: Arc<dyn TaskDispatcher>,
    pub log_sink: Arc<dyn LogSink>,
    pub token_exchange: Arc<dyn TokenExchange>,
}

pub struct BuildOrchestrator {
    config: DockerizerConfig,
    collaborators: Collaborators,
    resolver: CredentialResolver,
}

impl BuildOrchestrator {
    pub fn new(config: DockerizerConfig, collaborators: Collaborators) -> Self {
        let resolver = CredentialResolver::new(
            &config,
            collaborators.daemon.clone(),
            collaborators.token_exchange.clone(),
        );

        Self {
            config,
            collaborators,
            resolver,
        }
    }

    pub fn config(&self) -> &DockerizerConfig {
        &self.config
    }

    /// 全レジストリにログイン（失敗してもパイプラインは止めない）
    pub async fn authenticate(&self) -> AuthReport {
        let report = self.resolver.resolve_all().await;

        let failed_private = report
            .private
            .iter()
            .filter(|login| !login.result.is_authenticated())
            .count();
        tracing::info!(
            internal = %report.internal,
            cloud = %report.cloud,
            private = report.private.len(),
            failed_private,
            "Registry authentication finished"
        );
        if matches!(report.internal, PhaseResult::Failed(_)) {
            tracing::warn!("Internal registry login failed, push may fail");
        }

        report
    }

    /// パイプライン全体を実行
    ///
    /// # Returns
    /// * `Ok(outcome)` - パイプラインが最後まで（または途中のステージ失敗で）終わった場合
    /// * `Err(e)` - コードの参照先がないなど、開始前の前提条件を満たさない場合
    pub async fn run(&self, spec: &BuildSpec) -> Result<BuildOutcome> {
        let download_url = spec.download_url()?.to_string();
        let image = spec.image_reference(&self.config.registry.host);

        tracing::info!(job = %spec.job_name, image = %image, "Starting build");

        // 1. fetch
        if !self.fetch(spec, &download_url).await {
            self.send_status(spec, JobStatus::Failed, Some(DOWNLOAD_FAILED_MESSAGE))
                .await;
            return Ok(BuildOutcome::DownloadFailed);
        }

        // 2. authenticate
        self.authenticate().await;

        // 3. 存在確認
        if self.image_exists(&image).await {
            tracing::info!("Image {} already exists, skipping build", image);
            self.clean(spec);
            return Ok(BuildOutcome::AlreadyExists);
        }

        // タグと同じコミットに切り替えてから依存関係ファイルを解決する
        if !self.checkout(spec, &image).await {
            self.clean(spec);
            return Ok(BuildOutcome::BuildFailed);
        }

        // 4. render & write
        if let Err(e) = self.write_dockerfile(spec).await {
            tracing::error!("Failed to prepare Dockerfile: {}", e.user_message());
            self.clean(spec);
            return Ok(BuildOutcome::BuildFailed);
        }

        // 5. build
        if !self.build(spec, &image).await {
            self.clean(spec);
            return Ok(BuildOutcome::BuildFailed);
        }

        // 6. push
        if !self.push(spec, &image).await {
            self.clean(spec);
            self.send_status(spec, JobStatus::Failed, Some(PUSH_FAILED_MESSAGE))
                .await;
            return Ok(BuildOutcome::PushFailed);
        }

        // 7. cleanup
        self.clean(spec);
        tracing::info!("Successfully built and pushed: {}", image);
        Ok(BuildOutcome::BuiltAndPushed)
    }

    async fn fetch(&self, spec: &BuildSpec, url: &str) -> bool {
        tracing::debug!("Downloading code from {}", url);
        match self.collaborators.fetcher.fetch(url, &spec.repo_path).await {
            Ok(Some(path)) => {
                tracing::debug!("Code extracted to {}", path.display());
                true
            }
            Ok(None) => {
                tracing::error!("No code archive found at {}", url);
                false
            }
            Err(e) => {
                tracing::error!("Failed to download code: {}", e);
                false
            }
        }
    }

    async fn image_exists(&self, image: &ImageReference) -> bool {
        match self.collaborators.daemon.image_exists(image).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!("Failed to check image {}: {}", image, e);
                false
            }
        }
    }

    /// Dockerfile をレンダリングして書き出し、スケジューラに通知する
    async fn write_dockerfile(&self, spec: &BuildSpec) -> Result<()> {
        let mut renderer = RecipeRenderer::new(self.config.build.accelerator_bin.clone());
        let dockerfile = renderer.render(spec)?;
        let path = spec.dockerfile_path()?;

        tokio::fs::write(&path, &dockerfile).await?;
        tracing::debug!("Dockerfile written to {}", path.display());

        let message = TaskMessage::set_dockerfile(&spec.job_uuid, &dockerfile);
        if let Err(e) = self.collaborators.dispatcher.send_task(message).await {
            tracing::warn!("Failed to notify scheduler of Dockerfile: {}", e);
        }

        Ok(())
    }

    /// `latest` 以外のタグはそのコミットをチェックアウトする
    async fn checkout(&self, spec: &BuildSpec, image: &ImageReference) -> bool {
        if image.is_latest() {
            return true;
        }
        match self
            .collaborators
            .vcs
            .checkout(&spec.repo_path, &image.tag)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("{}", e);
                false
            }
        }
    }

    async fn build(&self, spec: &BuildSpec, image: &ImageReference) -> bool {
        tracing::debug!("Starting build in {}", spec.repo_path.display());

        let context_path = match spec.context_path() {
            Ok(path) => path.to_path_buf(),
            Err(e) => {
                tracing::error!("{}", e);
                return false;
            }
        };

        let request = BuildRequest {
            context_path,
            image: image.clone(),
            no_cache: spec.no_cache,
            memory_limit: spec.memory_limit,
        };

        let stream = self.collaborators.daemon.build(request);
        let outcome = self.batcher(spec).consume(stream).await;
        log_stage_outcome("Build", &outcome);
        outcome.is_success()
    }

    async fn push(&self, spec: &BuildSpec, image: &ImageReference) -> bool {
        let stream = self.collaborators.daemon.push(image);
        let outcome = self.batcher(spec).consume(stream).await;
        log_stage_outcome("Push", &outcome);
        outcome.is_success()
    }

    fn batcher(&self, spec: &BuildSpec) -> LogBatcher {
        LogBatcher::new(
            self.collaborators.log_sink.clone(),
            &spec.job_uuid,
            &spec.job_name,
            &self.config.logs,
        )
    }

    /// 生成した Dockerfile を削除
    fn clean(&self, spec: &BuildSpec) {
        if let Ok(path) = spec.dockerfile_path() {
            delete_path(&path);
        }
    }

    /// ジョブの最終ステータスをイベントシステムに送る
    pub async fn send_status(&self, spec: &BuildSpec, status: JobStatus, message: Option<&str>) {
        let payload = json!({
            "details": {
                "labels": {
                    "app": "dockerizer",
                    "job_uuid": spec.job_uuid,
                    "job_name": spec.job_name,
                    "project_uuid": spec.project_uuid,
                    "project_name": spec.project_name,
                }
            },
            "status": status,
            "message": message,
        });

        let task = TaskMessage::new(TASK_HANDLE_BUILD_JOB_STATUSES, json!({ "payload": payload }));
        if let Err(e) = self.collaborators.dispatcher.send_task(task).await {
            tracing::warn!("Failed to send status for {}: {}", spec.job_uuid, e);
        }
    }
}

fn log_stage_outcome(stage: &str, outcome: &StreamOutcome) {
    match outcome {
        StreamOutcome::Completed => tracing::info!("{} finished", stage),
        StreamOutcome::Failed(failure) => tracing::error!("{} failed: {}", stage, failure),
    }
}

fn delete_path(path: &Path) {
    if !path.exists() {
        return;
    }
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!("Deleted {}", path.display()),
        Err(e) => tracing::warn!("Failed to delete {}: {}", path.display(), e),
    }
}
