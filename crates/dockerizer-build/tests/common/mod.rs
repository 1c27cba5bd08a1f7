#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use dockerizer_build::auth::CloudToken;
use dockerizer_build::{
    BuildError, BuildOrchestrator, BuildRequest, BuildResult, BuildSpec, CodeFetcher,
    CodeReference, Collaborators, DaemonError, ImageDaemon, ImageReference, LogBatch, LogSink,
    ProgressStream, RegistryCredential, TaskDispatcher, TaskMessage, TokenExchange,
    VersionControl,
};
use dockerizer_config::{CloudRegistryConfig, DockerizerConfig};
use futures_util::stream::{self, StreamExt};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub type Chunk = Result<Bytes, DaemonError>;

pub fn line(json: &str) -> Chunk {
    Ok(Bytes::from(format!("{}\n", json)))
}

pub fn stream_lines(count: usize) -> Vec<Chunk> {
    (0..count)
        .map(|i| line(&format!(r#"{{"stream":"line {}\n"}}"#, i)))
        .collect()
}

/// 呼び出しを記録する ImageDaemon
#[derive(Default)]
pub struct MockDaemon {
    pub calls: Mutex<Vec<String>>,
    pub exists: bool,
    pub fail_logins: HashSet<String>,
    pub build_chunks: Vec<Chunk>,
    pub push_chunks: Vec<Chunk>,
    pub build_requests: Mutex<Vec<BuildRequest>>,
    /// build 呼び出し時にコンテキストに Dockerfile があったか
    pub dockerfile_present: Mutex<Vec<bool>>,
}

impl MockDaemon {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ImageDaemon for MockDaemon {
    async fn image_exists(&self, image: &ImageReference) -> BuildResult<bool> {
        self.record(format!("exists:{}", image));
        Ok(self.exists)
    }

    async fn login(&self, credential: &RegistryCredential, _reauth: bool) -> Result<(), DaemonError> {
        self.record(format!("login:{}", credential.host));
        if self.fail_logins.contains(&credential.host) {
            return Err(DaemonError::Login {
                registry: credential.host.clone(),
                message: "unauthorized".to_string(),
            });
        }
        Ok(())
    }

    fn build(&self, request: BuildRequest) -> ProgressStream<'_> {
        self.record(format!("build:{}", request.image));
        self.dockerfile_present
            .lock()
            .unwrap()
            .push(request.context_path.join("Dockerfile").exists());
        self.build_requests.lock().unwrap().push(request);
        stream::iter(self.build_chunks.clone()).boxed()
    }

    fn push<'a>(&'a self, image: &'a ImageReference) -> ProgressStream<'a> {
        self.record(format!("push:{}", image));
        stream::iter(self.push_chunks.clone()).boxed()
    }
}

/// 受け取ったバッチを記録する LogSink
#[derive(Default)]
pub struct RecordingSink {
    pub batches: Mutex<Vec<LogBatch>>,
}

impl RecordingSink {
    pub fn batches(&self) -> Vec<LogBatch> {
        self.batches.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.batches()
            .into_iter()
            .flat_map(|batch| batch.log_lines)
            .collect()
    }
}

#[async_trait]
impl LogSink for RecordingSink {
    async fn publish(&self, batch: LogBatch) -> BuildResult<()> {
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDispatcher {
    pub messages: Mutex<Vec<TaskMessage>>,
}

impl RecordingDispatcher {
    pub fn tasks(&self, name: &str) -> Vec<TaskMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.task == name)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TaskDispatcher for RecordingDispatcher {
    async fn send_task(&self, message: TaskMessage) -> BuildResult<()> {
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchBehavior {
    Extract,
    Absent,
    Fail,
}

/// destination にダミーのソースツリーを作る CodeFetcher
pub struct MockFetcher {
    pub behavior: FetchBehavior,
    pub files: Vec<(String, String)>,
    pub urls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new(behavior: FetchBehavior) -> Self {
        Self {
            behavior,
            files: vec![("train.py".to_string(), "print('hi')\n".to_string())],
            urls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CodeFetcher for MockFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> BuildResult<Option<PathBuf>> {
        self.urls.lock().unwrap().push(url.to_string());
        match self.behavior {
            FetchBehavior::Extract => {
                fs::create_dir_all(destination)?;
                for (name, content) in &self.files {
                    fs::write(destination.join(name), content)?;
                }
                Ok(Some(destination.to_path_buf()))
            }
            FetchBehavior::Absent => Ok(None),
            FetchBehavior::Fail => Err(BuildError::Download("connection refused".to_string())),
        }
    }
}

#[derive(Default)]
pub struct MockVcs {
    pub fail: bool,
    pub checkouts: Mutex<Vec<String>>,
    /// チェックアウトで現れるファイル（リポジトリからの相対パス, 内容）
    pub files: Vec<(String, String)>,
}

impl MockVcs {
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(path, content)| (path.to_string(), content.to_string()))
                .collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl VersionControl for MockVcs {
    async fn checkout(&self, repo_path: &Path, commit: &str) -> BuildResult<()> {
        self.checkouts.lock().unwrap().push(commit.to_string());
        if self.fail {
            return Err(BuildError::Checkout {
                path: repo_path.to_path_buf(),
                commit: commit.to_string(),
                message: "unknown revision".to_string(),
            });
        }
        for (path, content) in &self.files {
            fs::write(repo_path.join(path), content).unwrap();
        }
        Ok(())
    }
}

/// base64("AWS:secret") を返す TokenExchange
#[derive(Default)]
pub struct MockTokenExchange {
    pub fail: bool,
    pub calls: Mutex<usize>,
}

pub const ECR_ENDPOINT: &str = "https://123456789012.dkr.ecr.us-east-1.amazonaws.com";

#[async_trait]
impl TokenExchange for MockTokenExchange {
    async fn authorization_token(&self, cloud: &CloudRegistryConfig) -> BuildResult<CloudToken> {
        *self.calls.lock().unwrap() += 1;
        if self.fail {
            return Err(BuildError::AuthFailed {
                registry: cloud.region.clone(),
                message: "expired credentials".to_string(),
            });
        }
        Ok(CloudToken {
            authorization_token: "QVdTOnNlY3JldA==".to_string(),
            proxy_endpoint: ECR_ENDPOINT.to_string(),
        })
    }
}

/// テスト用のパイプライン一式
pub struct TestPipeline {
    pub root: TempDir,
    pub config: DockerizerConfig,
    pub daemon: Arc<MockDaemon>,
    pub fetcher: Arc<MockFetcher>,
    pub vcs: Arc<MockVcs>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub sink: Arc<RecordingSink>,
    pub tokens: Arc<MockTokenExchange>,
}

impl TestPipeline {
    pub fn new(daemon: MockDaemon, fetch: FetchBehavior) -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
            config: DockerizerConfig::default(),
            daemon: Arc::new(daemon),
            fetcher: Arc::new(MockFetcher::new(fetch)),
            vcs: Arc::new(MockVcs::default()),
            dispatcher: Arc::new(RecordingDispatcher::default()),
            sink: Arc::new(RecordingSink::default()),
            tokens: Arc::new(MockTokenExchange::default()),
        }
    }

    pub fn repo_path(&self) -> PathBuf {
        self.root.path().join("job-1").join("code")
    }

    pub fn dockerfile_path(&self) -> PathBuf {
        self.root.path().join("job-1").join("Dockerfile")
    }

    pub fn spec(&self) -> BuildSpec {
        BuildSpec::new("job-1", "mnist.1.build", "python:3.7", self.repo_path())
            .with_project("project-1", "mnist")
            .with_code_reference(CodeReference::internal("http://api/repos/mnist"))
            .with_build_steps(vec!["pip install torch".to_string()])
    }

    pub fn orchestrator(&self) -> BuildOrchestrator {
        let collaborators = Collaborators {
            daemon: self.daemon.clone(),
            fetcher: self.fetcher.clone(),
            vcs: self.vcs.clone(),
            dispatcher: self.dispatcher.clone(),
            log_sink: self.sink.clone(),
            token_exchange: self.tokens.clone(),
        };
        BuildOrchestrator::new(self.config.clone(), collaborators)
    }
}
