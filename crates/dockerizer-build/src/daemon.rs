//! イメージビルダー / レジストリとの通信インターフェース
//!
//! build と push はどちらも進捗レコードの生のバイト列を逐次返すストリームを返す。
//! 呼び出し側 ([`crate::log_stream::LogBatcher`]) はストリームを全てバッファせずに
//! 1 チャンクずつ消費する。

use crate::auth::RegistryCredential;
use crate::error::{DaemonError, Result};
use crate::spec::ImageReference;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use std::path::PathBuf;

/// 進捗レコードのストリーム
///
/// 1 チャンクには改行区切りの JSON レコードが複数含まれることがある。
/// `Err` はトランスポートレベルの失敗を表す。
pub type ProgressStream<'a> = BoxStream<'a, std::result::Result<Bytes, DaemonError>>;

/// イメージビルドの要求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// ビルドコンテキスト（Dockerfile はこの直下にある）
    pub context_path: PathBuf,
    pub image: ImageReference,
    pub no_cache: bool,
    /// メモリ上限 (bytes)。スワップは常に無効化する
    pub memory_limit: Option<u64>,
}

#[async_trait]
pub trait ImageDaemon: Send + Sync {
    /// イメージが既に存在するか確認
    async fn image_exists(&self, image: &ImageReference) -> Result<bool>;

    /// レジストリにログイン
    ///
    /// `reauth` が false の場合、既に認証済みのレジストリは再認証しない
    async fn login(
        &self,
        credential: &RegistryCredential,
        reauth: bool,
    ) -> std::result::Result<(), DaemonError>;

    /// イメージをビルドし、進捗ストリームを返す
    fn build(&self, request: BuildRequest) -> ProgressStream<'_>;

    /// イメージをプッシュし、進捗ストリームを返す
    fn push<'a>(&'a self, image: &'a ImageReference) -> ProgressStream<'a>;
}
