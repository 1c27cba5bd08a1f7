//! AWS ECR の認可トークン取得

use crate::auth::{CloudToken, TokenExchange};
use crate::error::{BuildError, BuildResult};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ecr::error::DisplayErrorContext;
use dockerizer_config::CloudRegistryConfig;

/// `GetAuthorizationToken` で短期トークンを取得する
///
/// 認証情報は AWS SDK の標準チェーン（環境変数、プロファイル、IAM ロール）から解決する。
#[derive(Debug, Default, Clone)]
pub struct EcrTokenExchange;

impl EcrTokenExchange {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TokenExchange for EcrTokenExchange {
    async fn authorization_token(&self, cloud: &CloudRegistryConfig) -> BuildResult<CloudToken> {
        let registry = format!("ecr:{}", cloud.region);
        let auth_failed = |message: String| BuildError::AuthFailed {
            registry: registry.clone(),
            message,
        };

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(cloud.region.clone()))
            .load()
            .await;
        let client = aws_sdk_ecr::Client::new(&sdk_config);

        let registry_ids: Vec<String> = cloud
            .account_id
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let output = client
            .get_authorization_token()
            .set_registry_ids(Some(registry_ids))
            .send()
            .await
            .map_err(|e| auth_failed(DisplayErrorContext(&e).to_string()))?;

        let data = output
            .authorization_data()
            .first()
            .ok_or_else(|| auth_failed("No authorization data returned".to_string()))?;

        let authorization_token = data
            .authorization_token()
            .ok_or_else(|| auth_failed("Authorization token missing".to_string()))?
            .to_string();
        let proxy_endpoint = data
            .proxy_endpoint()
            .ok_or_else(|| auth_failed("Proxy endpoint missing".to_string()))?
            .to_string();

        tracing::debug!("Obtained ECR authorization token for {}", proxy_endpoint);

        Ok(CloudToken {
            authorization_token,
            proxy_endpoint,
        })
    }
}
