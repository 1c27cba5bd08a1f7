mod common;

use common::*;
use dockerizer_build::{CredentialResolver, PhaseResult};
use dockerizer_config::{CloudRegistryConfig, DockerizerConfig, PrivateRegistryConfig};
use std::collections::HashSet;
use std::sync::Arc;

fn private(host: &str) -> PrivateRegistryConfig {
    PrivateRegistryConfig {
        host: host.to_string(),
        username: "robot".to_string(),
        password: "secret".to_string(),
    }
}

fn full_config() -> DockerizerConfig {
    let mut config = DockerizerConfig::default();
    config.cloud_registry = Some(CloudRegistryConfig {
        region: "us-east-1".to_string(),
        account_id: "123456789012".to_string(),
    });
    config.private_registries = vec![private("quay.io"), private("ghcr.io")];
    config
}

fn logins(daemon: &MockDaemon) -> Vec<String> {
    daemon
        .calls()
        .into_iter()
        .filter_map(|call| call.strip_prefix("login:").map(str::to_string))
        .collect()
}

#[tokio::test]
async fn test_login_order_internal_cloud_private() {
    let daemon = Arc::new(MockDaemon::default());
    let tokens = Arc::new(MockTokenExchange::default());
    let resolver = CredentialResolver::new(&full_config(), daemon.clone(), tokens.clone());

    let report = resolver.resolve_all().await;

    assert_eq!(
        logins(&daemon),
        vec![
            "127.0.0.1:5000".to_string(),
            ECR_ENDPOINT.to_string(),
            "quay.io".to_string(),
            "ghcr.io".to_string(),
        ]
    );
    assert_eq!(report.internal, PhaseResult::Authenticated);
    assert_eq!(report.cloud, PhaseResult::Authenticated);
    assert!(report.private.iter().all(|l| l.result.is_authenticated()));
    assert_eq!(*tokens.calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_cloud_phase_skipped_without_config() {
    let mut config = full_config();
    config.cloud_registry = None;

    let daemon = Arc::new(MockDaemon::default());
    let tokens = Arc::new(MockTokenExchange::default());
    let resolver = CredentialResolver::new(&config, daemon.clone(), tokens.clone());

    let report = resolver.resolve_all().await;

    assert_eq!(report.cloud, PhaseResult::Skipped);
    assert_eq!(*tokens.calls.lock().unwrap(), 0);
    assert_eq!(logins(&daemon).len(), 3);
}

#[tokio::test]
async fn test_cloud_phase_skipped_with_partial_config() {
    let mut config = full_config();
    config.cloud_registry = Some(CloudRegistryConfig {
        region: "us-east-1".to_string(),
        account_id: String::new(),
    });

    let daemon = Arc::new(MockDaemon::default());
    let tokens = Arc::new(MockTokenExchange::default());
    let resolver = CredentialResolver::new(&config, daemon, tokens.clone());

    assert_eq!(resolver.resolve_cloud().await, PhaseResult::Skipped);
    assert_eq!(*tokens.calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_no_private_registries_makes_no_private_logins() {
    let mut config = full_config();
    config.private_registries.clear();

    let daemon = Arc::new(MockDaemon::default());
    let resolver = CredentialResolver::new(
        &config,
        daemon.clone(),
        Arc::new(MockTokenExchange::default()),
    );

    let report = resolver.resolve_all().await;

    assert!(report.private.is_empty());
    assert_eq!(logins(&daemon).len(), 2);
}

#[tokio::test]
async fn test_private_failure_does_not_stop_later_logins() {
    let daemon = Arc::new(MockDaemon {
        fail_logins: HashSet::from(["quay.io".to_string()]),
        ..Default::default()
    });
    let resolver = CredentialResolver::new(
        &full_config(),
        daemon.clone(),
        Arc::new(MockTokenExchange::default()),
    );

    let report = resolver.resolve_private().await;

    assert_eq!(report.len(), 2);
    assert_eq!(report[0].host, "quay.io");
    assert!(matches!(report[0].result, PhaseResult::Failed(_)));
    assert_eq!(report[1].host, "ghcr.io");
    assert!(report[1].result.is_authenticated());
}

#[tokio::test]
async fn test_token_exchange_failure_continues_to_private() {
    let daemon = Arc::new(MockDaemon::default());
    let tokens = Arc::new(MockTokenExchange {
        fail: true,
        ..Default::default()
    });
    let resolver = CredentialResolver::new(&full_config(), daemon.clone(), tokens);

    let report = resolver.resolve_all().await;

    assert!(matches!(report.cloud, PhaseResult::Failed(_)));
    assert_eq!(
        logins(&daemon),
        vec![
            "127.0.0.1:5000".to_string(),
            "quay.io".to_string(),
            "ghcr.io".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_internal_failure_does_not_abort_pipeline_auth() {
    let daemon = Arc::new(MockDaemon {
        fail_logins: HashSet::from(["127.0.0.1:5000".to_string()]),
        ..Default::default()
    });
    let resolver = CredentialResolver::new(
        &full_config(),
        daemon.clone(),
        Arc::new(MockTokenExchange::default()),
    );

    let report = resolver.resolve_all().await;

    assert!(matches!(report.internal, PhaseResult::Failed(_)));
    assert_eq!(logins(&daemon).len(), 4);
}
