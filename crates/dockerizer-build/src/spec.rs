//! ビルド要求のデータモデル
//!
//! 呼び出し元のジョブ情報から一度だけ組み立てる `BuildSpec` と、
//! そこから決定的に導出される `ImageReference`、ビルド結果の `BuildOutcome`。

use crate::error::{BuildError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// "latest" を表すタグ。このタグの場合はコミットのチェックアウトを行わない
pub const LATEST_IMAGE_TAG: &str = "latest";

/// イメージ内のデフォルト作業ディレクトリ
pub const DEFAULT_WORKDIR: &str = "/code";

/// レンダリングした Dockerfile のファイル名（ビルドコンテキスト直下に書き出す）
pub const DOCKERFILE_NAME: &str = "Dockerfile";

/// ソースコードのダウンロード元
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeReference {
    /// 内部リポジトリ
    #[serde(default)]
    pub repo: Option<RepoLocation>,
    /// 外部リポジトリ
    #[serde(default)]
    pub external_repo: Option<RepoLocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoLocation {
    pub download_url: String,
}

impl CodeReference {
    pub fn internal(download_url: impl Into<String>) -> Self {
        Self {
            repo: Some(RepoLocation {
                download_url: download_url.into(),
            }),
            external_repo: None,
        }
    }

    pub fn external(download_url: impl Into<String>) -> Self {
        Self {
            repo: None,
            external_repo: Some(RepoLocation {
                download_url: download_url.into(),
            }),
        }
    }

    /// ダウンロード URL を解決する（内部リポジトリを優先）
    pub fn download_url(&self) -> Option<&str> {
        self.repo
            .as_ref()
            .or(self.external_repo.as_ref())
            .map(|r| r.download_url.as_str())
    }
}

/// 1回分のビルド要求
///
/// 組み立て後は変更しない。パイプラインは常に `&BuildSpec` で受け取る。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSpec {
    pub job_uuid: String,
    pub job_name: String,
    pub project_uuid: String,
    pub project_name: String,
    /// ベースイメージ（例: "python:3.7"）
    pub from_image: String,
    pub copy_code: bool,
    pub build_steps: Vec<String>,
    pub env_vars: Vec<(String, String)>,
    pub workdir: String,
    /// ソースコードを展開するディレクトリ。親ディレクトリがビルドコンテキストになる
    pub repo_path: PathBuf,
    /// 依存関係ファイル（repo_path からの相対パス）。未指定なら自動検出
    pub requirements_path: Option<PathBuf>,
    /// セットアップスクリプト（repo_path からの相対パス）。未指定なら自動検出
    pub setup_path: Option<PathBuf>,
    pub code_reference: CodeReference,
    /// 明示的なタグ。未指定ならジョブ UUID
    pub image_tag: Option<String>,
    pub no_cache: bool,
    /// ビルド時のメモリ上限 (bytes)
    pub memory_limit: Option<u64>,
}

impl BuildSpec {
    /// 最小限の情報から BuildSpec を作成
    pub fn new(
        job_uuid: impl Into<String>,
        job_name: impl Into<String>,
        from_image: impl Into<String>,
        repo_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            job_uuid: job_uuid.into(),
            job_name: job_name.into(),
            project_uuid: String::new(),
            project_name: String::new(),
            from_image: from_image.into(),
            copy_code: true,
            build_steps: Vec::new(),
            env_vars: Vec::new(),
            workdir: DEFAULT_WORKDIR.to_string(),
            repo_path: repo_path.into(),
            requirements_path: None,
            setup_path: None,
            code_reference: CodeReference::default(),
            image_tag: None,
            no_cache: false,
            memory_limit: None,
        }
    }

    pub fn with_project(
        mut self,
        project_uuid: impl Into<String>,
        project_name: impl Into<String>,
    ) -> Self {
        self.project_uuid = project_uuid.into();
        self.project_name = project_name.into();
        self
    }

    pub fn with_code_reference(mut self, code_reference: CodeReference) -> Self {
        self.code_reference = code_reference;
        self
    }

    pub fn with_build_steps(mut self, steps: Vec<String>) -> Self {
        self.build_steps = steps;
        self
    }

    pub fn with_env_vars(mut self, env_vars: Vec<(String, String)>) -> Self {
        self.env_vars = env_vars;
        self
    }

    pub fn with_copy_code(mut self, copy_code: bool) -> Self {
        self.copy_code = copy_code;
        self
    }

    pub fn with_image_tag(mut self, tag: impl Into<String>) -> Self {
        self.image_tag = Some(tag.into());
        self
    }

    pub fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub fn with_memory_limit(mut self, memory_limit: Option<u64>) -> Self {
        self.memory_limit = memory_limit;
        self
    }

    /// ダウンロード URL（内部 → 外部）。どちらもなければ前提条件エラー
    pub fn download_url(&self) -> Result<&str> {
        self.code_reference
            .download_url()
            .ok_or_else(|| BuildError::MissingCodeReference(self.job_uuid.clone()))
    }

    /// イメージタグ（デフォルトはジョブ UUID）
    pub fn tag(&self) -> &str {
        self.image_tag.as_deref().unwrap_or(&self.job_uuid)
    }

    /// repo_path の最後のコンポーネント（COPY 命令で使う）
    pub fn folder_name(&self) -> Result<String> {
        self.repo_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                BuildError::InvalidConfig(format!(
                    "repo_path has no directory name: {}",
                    self.repo_path.display()
                ))
            })
    }

    /// ビルドコンテキスト（repo_path の親ディレクトリ）
    pub fn context_path(&self) -> Result<&Path> {
        self.repo_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| BuildError::ContextNotFound(self.repo_path.clone()))
    }

    /// レンダリングした Dockerfile の書き出し先
    pub fn dockerfile_path(&self) -> Result<PathBuf> {
        Ok(self.context_path()?.join(DOCKERFILE_NAME))
    }

    /// 対象イメージの参照を導出
    pub fn image_reference(&self, registry_host: &str) -> ImageReference {
        let name = if self.project_name.is_empty() {
            &self.job_name
        } else {
            &self.project_name
        };
        ImageReference::new(
            format!("{}/{}", registry_host, sanitize_repository(name)),
            self.tag(),
        )
    }
}

/// リポジトリ名として使えない文字を置換する
fn sanitize_repository(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' | '-' | '/' => c,
            _ => '_',
        })
        .collect()
}

/// (リポジトリ, タグ) の組
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    pub fn is_latest(&self) -> bool {
        self.tag == LATEST_IMAGE_TAG
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// 1回のビルド試行の最終結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildOutcome {
    AlreadyExists,
    BuiltAndPushed,
    BuildFailed,
    PushFailed,
    DownloadFailed,
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BuildOutcome::AlreadyExists | BuildOutcome::BuiltAndPushed)
    }
}

impl fmt::Display for BuildOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildOutcome::AlreadyExists => "already exists",
            BuildOutcome::BuiltAndPushed => "built and pushed",
            BuildOutcome::BuildFailed => "build failed",
            BuildOutcome::PushFailed => "push failed",
            BuildOutcome::DownloadFailed => "download failed",
        };
        f.write_str(s)
    }
}

/// イベントシステムに送るジョブのステータス
///
/// このパイプラインが明示的に報告するのは失敗（ダウンロード、プッシュ）のみ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Failed,
}
