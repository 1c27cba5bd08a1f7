//! 環境変数による設定の上書き

use crate::error::{ConfigError, Result};
use crate::model::{CloudRegistryConfig, DockerizerConfig, PrivateRegistryConfig};

pub const ENV_REGISTRY_HOST: &str = "DOCKERIZER_REGISTRY_HOST";
pub const ENV_REGISTRY_NODE_PORT: &str = "DOCKERIZER_REGISTRY_NODE_PORT";
pub const ENV_REGISTRY_USER: &str = "DOCKERIZER_REGISTRY_USER";
pub const ENV_REGISTRY_PASSWORD: &str = "DOCKERIZER_REGISTRY_PASSWORD";
pub const ENV_ECR_REGION: &str = "DOCKERIZER_ECR_REGION";
pub const ENV_ECR_ACCOUNT_ID: &str = "DOCKERIZER_ECR_ACCOUNT_ID";
pub const ENV_PRIVATE_REGISTRIES: &str = "DOCKERIZER_PRIVATE_REGISTRIES";
pub const ENV_NVIDIA_BIN: &str = "DOCKERIZER_NVIDIA_BIN";
pub const ENV_DISPATCHER_ENDPOINT: &str = "DOCKERIZER_DISPATCHER_ENDPOINT";

/// 空文字列は未設定として扱う
fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl DockerizerConfig {
    /// 環境変数で設定を上書き
    ///
    /// 優先順位は 設定ファイル < 環境変数。
    /// `DOCKERIZER_REGISTRY_NODE_PORT` が設定されている場合、内部レジストリは
    /// ノード上のポート (`127.0.0.1:<port>`) 経由で参照する。
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(host) = var(ENV_REGISTRY_HOST) {
            self.registry.host = host;
        }
        if let Some(port) = var(ENV_REGISTRY_NODE_PORT) {
            let port: u16 = port.parse().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_REGISTRY_NODE_PORT.to_string(),
                message: format!("'{}' is not a port number", port),
            })?;
            self.registry.host = format!("127.0.0.1:{}", port);
        }
        if let Some(user) = var(ENV_REGISTRY_USER) {
            self.registry.user = Some(user);
        }
        if let Some(password) = var(ENV_REGISTRY_PASSWORD) {
            self.registry.password = Some(password);
        }

        match (var(ENV_ECR_REGION), var(ENV_ECR_ACCOUNT_ID)) {
            (Some(region), Some(account_id)) => {
                self.cloud_registry = Some(CloudRegistryConfig { region, account_id });
            }
            (None, None) => {}
            _ => {
                tracing::warn!(
                    "Both {} and {} are required for ECR, ignoring partial configuration",
                    ENV_ECR_REGION,
                    ENV_ECR_ACCOUNT_ID
                );
            }
        }

        if let Some(raw) = var(ENV_PRIVATE_REGISTRIES) {
            let registries: Vec<PrivateRegistryConfig> =
                serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidEnv {
                    name: ENV_PRIVATE_REGISTRIES.to_string(),
                    message: e.to_string(),
                })?;
            self.private_registries = registries;
        }

        if let Some(bin) = var(ENV_NVIDIA_BIN) {
            self.build.accelerator_bin = Some(bin);
        }
        if let Some(endpoint) = var(ENV_DISPATCHER_ENDPOINT) {
            self.dispatcher.endpoint = Some(endpoint);
        }

        Ok(())
    }
}
