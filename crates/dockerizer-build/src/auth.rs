//! レジストリ認証処理
//!
//! ビルド前にログインするレジストリを決定し、順番にログインします。
//!
//! 1. 内部レジストリ（常に実行）
//! 2. クラウドレジストリ (AWS ECR)。region と account_id が設定されている場合のみ
//! 3. プライベートレジストリ。設定順に、1つの失敗が次のログインを妨げない
//!
//! ログインの失敗はここではエラーにしない。認証が本当に必要なレジストリであれば
//! push の段階で失敗として表面化する。

use crate::daemon::ImageDaemon;
use crate::error::{BuildError, BuildResult};
use async_trait::async_trait;
use base64::Engine;
use dockerizer_config::{CloudRegistryConfig, DockerizerConfig};
use std::fmt;
use std::sync::Arc;

/// 1つのレジストリの認証情報
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredential {
    pub host: String,
    pub username: String,
    pub password: String,
}

impl RegistryCredential {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for RegistryCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredential")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// 認証フェーズの結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseResult {
    Authenticated,
    Failed(String),
    /// 設定がないため実行しなかった
    Skipped,
}

impl PhaseResult {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, PhaseResult::Authenticated)
    }
}

impl fmt::Display for PhaseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseResult::Authenticated => f.write_str("authenticated"),
            PhaseResult::Failed(reason) => write!(f, "failed ({})", reason),
            PhaseResult::Skipped => f.write_str("skipped"),
        }
    }
}

/// プライベートレジストリ1件分のログイン結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryLogin {
    pub host: String,
    pub result: PhaseResult,
}

/// 全フェーズの結果（internal → cloud → private の順）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthReport {
    pub internal: PhaseResult,
    pub cloud: PhaseResult,
    /// 空の場合はプライベートレジストリのフェーズをスキップした
    pub private: Vec<RegistryLogin>,
}

/// クラウドレジストリの短期トークン
#[derive(Clone, PartialEq, Eq)]
pub struct CloudToken {
    /// Base64エンコードされた "username:password"
    pub authorization_token: String,
    /// ログイン先のエンドポイント
    pub proxy_endpoint: String,
}

impl fmt::Debug for CloudToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudToken")
            .field("authorization_token", &"***")
            .field("proxy_endpoint", &self.proxy_endpoint)
            .finish()
    }
}

/// クラウドレジストリの認可トークンを取得する
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn authorization_token(&self, cloud: &CloudRegistryConfig) -> BuildResult<CloudToken>;
}

/// Base64エンコードされた "username:password" をデコード
pub fn decode_authorization_token(token: &str, registry: &str) -> BuildResult<(String, String)> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token.trim())
        .map_err(|e| BuildError::AuthFailed {
            registry: registry.to_string(),
            message: format!("Failed to decode auth: {}", e),
        })?;

    let auth_str = String::from_utf8(decoded).map_err(|e| BuildError::AuthFailed {
        registry: registry.to_string(),
        message: format!("Invalid UTF-8 in auth: {}", e),
    })?;

    auth_str
        .split_once(':')
        .map(|(user, password)| (user.to_string(), password.to_string()))
        .ok_or_else(|| BuildError::AuthFailed {
            registry: registry.to_string(),
            message: "Authorization token is not in user:password form".to_string(),
        })
}

/// イメージ名からレジストリを抽出
///
/// # Examples
/// - `ghcr.io/org/app:tag` -> `ghcr.io`
/// - `myuser/app:tag` -> `docker.io`
/// - `localhost:5000/app` -> `localhost:5000`
pub fn extract_registry(image: &str) -> String {
    if let Some((first, _)) = image.split_once('/') {
        // レジストリは . または : を含む（例: ghcr.io, localhost:5000）
        if first.contains('.') || first.contains(':') {
            return first.to_string();
        }
    }

    "docker.io".to_string()
}

/// ログイン先の決定とログインを行う
pub struct CredentialResolver {
    daemon: Arc<dyn ImageDaemon>,
    token_exchange: Arc<dyn TokenExchange>,
    internal: RegistryCredential,
    cloud: Option<CloudRegistryConfig>,
    private: Vec<RegistryCredential>,
}

impl CredentialResolver {
    pub fn new(
        config: &DockerizerConfig,
        daemon: Arc<dyn ImageDaemon>,
        token_exchange: Arc<dyn TokenExchange>,
    ) -> Self {
        let internal = RegistryCredential::new(
            config.registry.host.clone(),
            config.registry.user.clone().unwrap_or_default(),
            config.registry.password.clone().unwrap_or_default(),
        );
        let private = config
            .private_registries
            .iter()
            .map(|r| RegistryCredential::new(&r.host, &r.username, &r.password))
            .collect();

        Self {
            daemon,
            token_exchange,
            internal,
            cloud: config.cloud_registry().cloned(),
            private,
        }
    }

    /// 全フェーズを順番に実行
    pub async fn resolve_all(&self) -> AuthReport {
        let internal = self.resolve_internal().await;
        let cloud = self.resolve_cloud().await;
        let private = self.resolve_private().await;

        AuthReport {
            internal,
            cloud,
            private,
        }
    }

    /// 内部レジストリにログイン
    pub async fn resolve_internal(&self) -> PhaseResult {
        tracing::info!("Logging to Docker internal registry {}", self.internal.host);
        self.login(&self.internal).await
    }

    /// クラウドレジストリ (ECR) にログイン
    pub async fn resolve_cloud(&self) -> PhaseResult {
        let Some(cloud) = &self.cloud else {
            return PhaseResult::Skipped;
        };

        tracing::info!("Logging to AWS ECR registry on {}", cloud.region);

        let credential = match self.exchange_cloud_token(cloud).await {
            Ok(credential) => credential,
            Err(e) => {
                tracing::error!("Failed to obtain ECR authorization token: {}", e);
                return PhaseResult::Failed(e.to_string());
            }
        };

        self.login(&credential).await
    }

    /// プライベートレジストリに設定順でログイン
    pub async fn resolve_private(&self) -> Vec<RegistryLogin> {
        let mut results = Vec::with_capacity(self.private.len());

        for credential in &self.private {
            tracing::info!("Logging to Docker private registry - {}", credential.host);
            let result = self.login(credential).await;
            results.push(RegistryLogin {
                host: credential.host.clone(),
                result,
            });
        }

        results
    }

    async fn exchange_cloud_token(
        &self,
        cloud: &CloudRegistryConfig,
    ) -> BuildResult<RegistryCredential> {
        let token = self.token_exchange.authorization_token(cloud).await?;
        let (username, password) =
            decode_authorization_token(&token.authorization_token, &token.proxy_endpoint)?;

        Ok(RegistryCredential::new(
            token.proxy_endpoint,
            username,
            password,
        ))
    }

    async fn login(&self, credential: &RegistryCredential) -> PhaseResult {
        match self.daemon.login(credential, true).await {
            Ok(()) => {
                tracing::debug!("Logged in to {}", credential.host);
                PhaseResult::Authenticated
            }
            Err(e) => {
                tracing::error!("Failed to connect to registry {}: {}", credential.host, e);
                PhaseResult::Failed(e.to_string())
            }
        }
    }
}
