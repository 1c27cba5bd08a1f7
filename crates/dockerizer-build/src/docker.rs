//! Docker デーモン実装 (bollard)
//!
//! bollard はレスポンスを構造体にデコードして返すため、各レコードを JSON 行に
//! エンコードし直してから [`ProgressStream`] に流す。これにより
//! [`crate::log_stream::LogBatcher`] は常にデーモンのワイヤーフォーマットを扱う。

use crate::auth::{RegistryCredential, extract_registry};
use crate::context::ContextBuilder;
use crate::daemon::{BuildRequest, ImageDaemon, ProgressStream};
use crate::error::{DaemonError, Result};
use crate::spec::{DOCKERFILE_NAME, ImageReference};
use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
#[allow(deprecated)]
use bollard::image::{BuildImageOptions, PushImageOptions};
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use http_body_util::{Either, Full};
use serde::Serialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub struct DockerDaemon {
    docker: Docker,
    /// ログイン済みレジストリの認証情報（ホスト -> 認証情報）
    credentials: Mutex<HashMap<String, DockerCredentials>>,
}

impl DockerDaemon {
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            credentials: Mutex::new(HashMap::new()),
        }
    }

    /// ローカルのデフォルト設定で Docker に接続
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self::new(docker))
    }

    fn credentials(&self) -> MutexGuard<'_, HashMap<String, DockerCredentials>> {
        self.credentials
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn credentials_for(&self, repository: &str) -> Option<DockerCredentials> {
        credentials_for_repository(&self.credentials(), repository)
    }

    /// ビルド時に渡す X-Registry-Config
    fn registry_config(&self) -> Option<HashMap<String, DockerCredentials>> {
        let credentials = self.credentials();
        if credentials.is_empty() {
            None
        } else {
            Some(credentials.clone())
        }
    }
}

/// ECR の proxy endpoint は "https://" 付きで返るため、ホスト名に正規化する
fn normalize_host(host: &str) -> String {
    host.trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string()
}

/// リポジトリ名の先頭に一致するホストのうち最も長いものの認証情報を返す
///
/// 一致するホストがなければリポジトリ名から推測したレジストリで引く
fn credentials_for_repository(
    credentials: &HashMap<String, DockerCredentials>,
    repository: &str,
) -> Option<DockerCredentials> {
    credentials
        .iter()
        .filter(|(host, _)| {
            repository
                .strip_prefix(host.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
        })
        .max_by_key(|(host, _)| host.len())
        .map(|(_, credential)| credential.clone())
        .or_else(|| credentials.get(&extract_registry(repository)).cloned())
}

/// デコード済みのレコードを JSON 行に戻す
fn encode<T: Serialize>(
    item: std::result::Result<T, bollard::errors::Error>,
) -> std::result::Result<Bytes, DaemonError> {
    let record = item?;
    let mut line = serde_json::to_vec(&record).map_err(|e| DaemonError::Api(e.to_string()))?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

#[async_trait]
impl ImageDaemon for DockerDaemon {
    async fn image_exists(&self, image: &ImageReference) -> Result<bool> {
        match self.docker.inspect_image(&image.to_string()).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn login(
        &self,
        credential: &RegistryCredential,
        reauth: bool,
    ) -> std::result::Result<(), DaemonError> {
        let host = normalize_host(&credential.host);
        if !reauth && self.credentials().contains_key(&host) {
            tracing::debug!("Already logged in to {}", host);
            return Ok(());
        }

        let login_failed = |message: String| DaemonError::Login {
            registry: host.clone(),
            message,
        };

        let mut child = Command::new("docker")
            .arg("login")
            .arg(&host)
            .arg("--username")
            .arg(&credential.username)
            .arg("--password-stdin")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| login_failed(format!("Failed to run docker login: {}", e)))?;

        // パスワードは stdin 経由で渡す（プロセス一覧に残さない）
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(credential.password.as_bytes())
                .await
                .map_err(|e| login_failed(e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| login_failed(e.to_string()))?;

        if !output.status.success() {
            return Err(login_failed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        self.credentials().insert(
            host.clone(),
            DockerCredentials {
                username: Some(credential.username.clone()),
                password: Some(credential.password.clone()),
                serveraddress: Some(host),
                ..Default::default()
            },
        );

        Ok(())
    }

    fn build(&self, request: BuildRequest) -> ProgressStream<'_> {
        tracing::info!("Building image: {}", request.image);

        let context = match ContextBuilder::create_context(&request.context_path) {
            Ok(context) => context,
            Err(e) => {
                let error = DaemonError::Context(e.to_string());
                return stream::once(async move { Err(error) }).boxed();
            }
        };

        #[allow(deprecated)]
        let options = BuildImageOptions::<String> {
            dockerfile: DOCKERFILE_NAME.to_string(),
            t: request.image.to_string(),
            nocache: request.no_cache,
            rm: true,      // 中間コンテナを削除
            forcerm: true, // ビルド失敗時も中間コンテナを削除
            pull: true,    // ベースイメージを常にpull
            memory: request.memory_limit,
            memswap: Some(-1), // スワップは常に無効
            ..Default::default()
        };

        tracing::debug!("Build options: {:?}", options);

        let body = Full::new(Bytes::from(context));

        #[allow(deprecated)]
        let stream = self
            .docker
            .build_image(options, self.registry_config(), Some(Either::Left(body)));

        stream.map(encode).boxed()
    }

    fn push<'a>(&'a self, image: &'a ImageReference) -> ProgressStream<'a> {
        tracing::info!("Pushing image: {}", image);

        let credentials = self.credentials_for(&image.repository);

        #[allow(deprecated)]
        let options = PushImageOptions::<String> {
            tag: image.tag.clone(),
        };

        #[allow(deprecated)]
        let stream = self
            .docker
            .push_image(&image.repository, Some(options), credentials);

        stream.map(encode).boxed()
    }
}
