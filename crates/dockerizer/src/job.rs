//! ジョブ定義ファイル (JSON) の読み込み

use anyhow::Context;
use dockerizer_build::{BuildSpec, CodeReference};
use dockerizer_config::BuildSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobFile {
    pub job_uuid: String,
    pub job_name: String,
    #[serde(default)]
    pub project_uuid: String,
    #[serde(default)]
    pub project_name: String,
    /// ベースイメージ
    pub image: String,
    #[serde(default = "default_true")]
    pub copy_code: bool,
    #[serde(default)]
    pub build_steps: Vec<String>,
    #[serde(default)]
    pub env_vars: Vec<(String, String)>,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub code_reference: CodeReference,
    #[serde(default)]
    pub image_tag: Option<String>,
    #[serde(default)]
    pub nocache: bool,
    #[serde(default)]
    pub memory_limit: Option<u64>,
    #[serde(default)]
    pub repo_path: Option<PathBuf>,
    #[serde(default)]
    pub requirements_path: Option<PathBuf>,
    #[serde(default)]
    pub setup_path: Option<PathBuf>,
}

impl JobFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("ジョブファイルを読み込めません: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("ジョブファイルの形式が不正です: {}", path.display()))
    }

    /// BuildSpec に変換（repo_path 未指定なら `<root>/<job_uuid>/code`）
    pub fn into_spec(self, settings: &BuildSettings) -> BuildSpec {
        let repo_path = self
            .repo_path
            .unwrap_or_else(|| settings.root.join(&self.job_uuid).join("code"));

        let mut spec = BuildSpec::new(self.job_uuid, self.job_name, self.image, repo_path)
            .with_project(self.project_uuid, self.project_name)
            .with_code_reference(self.code_reference)
            .with_build_steps(self.build_steps)
            .with_env_vars(self.env_vars)
            .with_copy_code(self.copy_code)
            .with_no_cache(self.nocache)
            .with_memory_limit(self.memory_limit);

        if let Some(tag) = self.image_tag {
            spec = spec.with_image_tag(tag);
        }
        spec.workdir = self.workdir.unwrap_or_else(|| settings.workdir.clone());
        spec.requirements_path = self.requirements_path;
        spec.setup_path = self.setup_path;
        spec
    }
}
