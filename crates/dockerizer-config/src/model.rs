//! 設定モデル
//!
//! レジストリ認証情報、ビルド設定、ログのバッチ設定、タスク送信先を保持します。
//! プロセス全体で一度読み込み、`BuildOrchestrator` に明示的に渡して使います。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Dockerizer の設定全体
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerizerConfig {
    /// 内部レジストリ（常に最初にログインする）
    pub registry: InternalRegistryConfig,
    /// クラウドレジストリ (AWS ECR)。region と account_id が揃っている場合のみ有効
    pub cloud_registry: Option<CloudRegistryConfig>,
    /// プライベートレジストリ（設定順にログインする）
    pub private_registries: Vec<PrivateRegistryConfig>,
    pub build: BuildSettings,
    pub logs: LogBatchSettings,
    pub dispatcher: DispatcherSettings,
}

impl DockerizerConfig {
    /// 有効なクラウドレジストリ設定を返す
    ///
    /// region と account_id のどちらかが空の場合は未設定とみなす
    pub fn cloud_registry(&self) -> Option<&CloudRegistryConfig> {
        self.cloud_registry
            .as_ref()
            .filter(|cloud| !cloud.region.is_empty() && !cloud.account_id.is_empty())
    }
}

/// 内部レジストリの設定
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InternalRegistryConfig {
    /// レジストリホスト（例: "127.0.0.1:5000"）
    pub host: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for InternalRegistryConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1:5000".to_string(),
            user: None,
            password: None,
        }
    }
}

impl fmt::Debug for InternalRegistryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalRegistryConfig")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// AWS ECR の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudRegistryConfig {
    pub region: String,
    pub account_id: String,
}

/// プライベートレジストリの設定
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateRegistryConfig {
    pub host: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for PrivateRegistryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateRegistryConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// ビルド設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    /// ソースコードを展開するルートディレクトリ
    pub root: PathBuf,
    /// イメージ内の作業ディレクトリ
    pub workdir: String,
    /// GPU ライブラリのパス（LD_LIBRARY_PATH に追加される）
    pub accelerator_bin: Option<String>,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/tmp/build"),
            workdir: "/code".to_string(),
            accelerator_bin: None,
        }
    }
}

/// ビルドログのバッチ送信設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogBatchSettings {
    /// 1バッチあたりの最大行数
    pub max_lines: usize,
    /// 最後の送信からこの秒数を超えたら未送信行を送る
    pub flush_interval_secs: u64,
}

impl LogBatchSettings {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

impl Default for LogBatchSettings {
    fn default() -> Self {
        Self {
            max_lines: 50,
            flush_interval_secs: 5,
        }
    }
}

/// タスク送信先の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    /// タスクを POST するエンドポイント。未設定の場合はログ出力のみ
    pub endpoint: Option<String>,
    /// ソースコードのダウンロード時に付与する内部リクエストヘッダ
    pub internal_header: String,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            internal_header: "X-Dockerizer-Internal".to_string(),
        }
    }
}
