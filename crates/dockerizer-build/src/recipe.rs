//! Dockerfile のレンダリング
//!
//! Teraを使用して BuildSpec から Dockerfile を生成します。
//! 出力は入力のみで決まり、時刻や乱数には依存しません。

use crate::error::{BuildError, Result};
use crate::spec::BuildSpec;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tera::{Context, Tera};

/// 依存関係ファイルの候補（先に見つかったものを使う）
pub const REQUIREMENTS_FILES: [&str; 2] = ["dockerizer_requirements.txt", "requirements.txt"];

/// セットアップスクリプトの候補（先に見つかったものを使う）
pub const SETUP_FILES: [&str; 2] = ["dockerizer_setup.sh", "setup.sh"];

const DOCKERFILE_TEMPLATE: &str = r#"FROM {{ from_image }}

ENV LC_ALL C.UTF-8
ENV LANG C.UTF-8
ENV LANGUAGE C.UTF-8
{% for env_var in env_vars %}
ENV {{ env_var.name }} {{ env_var.value }}
{%- endfor %}

WORKDIR {{ workdir }}
{% if requirements %}
COPY {{ requirements.context_path }} {{ workdir }}/{{ requirements.file_name }}
RUN pip install --no-cache-dir -r {{ workdir }}/{{ requirements.file_name }}
{% endif %}
{%- if setup %}
COPY {{ setup.context_path }} {{ workdir }}/{{ setup.file_name }}
RUN {{ workdir }}/{{ setup.file_name }}
{% endif %}
{%- if copy_code %}
COPY {{ folder_name }} {{ workdir }}
{% endif %}
{%- for step in build_steps %}
{{ step }}
{%- endfor %}
{% if accelerator_bin %}
ENV LD_LIBRARY_PATH $LD_LIBRARY_PATH:{{ accelerator_bin }}
{% endif %}"#;

#[derive(Debug, Serialize)]
struct EnvVar<'a> {
    name: &'a str,
    value: &'a str,
}

/// ソースディレクトリ内で見つかったファイル
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncludedFile {
    /// ビルドコンテキストからの相対パス（例: "code/requirements.txt"）
    pub context_path: String,
    pub file_name: String,
}

/// レンダリングに使う依存関係ファイルとセットアップスクリプト
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyFiles {
    pub requirements: Option<IncludedFile>,
    pub setup: Option<IncludedFile>,
}

impl DependencyFiles {
    /// ソースディレクトリから依存関係ファイルを解決
    ///
    /// BuildSpec に明示的な指定があればそれを優先し、なければ候補を順に探す。
    /// セットアップスクリプトが見つかった場合は実行ビットを付与する。
    pub fn resolve(spec: &BuildSpec) -> Result<Self> {
        let folder_name = spec.folder_name()?;

        let requirements = match &spec.requirements_path {
            Some(path) => Some(explicit_file(&spec.repo_path, path)?),
            None => find_first(&spec.repo_path, &REQUIREMENTS_FILES),
        };

        let setup = match &spec.setup_path {
            Some(path) => Some(explicit_file(&spec.repo_path, path)?),
            None => find_first(&spec.repo_path, &SETUP_FILES),
        };
        if let Some(relative) = &setup {
            make_executable(&spec.repo_path.join(relative))?;
        }

        Ok(Self {
            requirements: requirements.map(|r| included(&folder_name, &r)),
            setup: setup.map(|s| included(&folder_name, &s)),
        })
    }
}

fn included(folder_name: &str, relative: &Path) -> IncludedFile {
    IncludedFile {
        context_path: format!("{}/{}", folder_name, relative.to_string_lossy()),
        file_name: relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

fn find_first(repo_path: &Path, candidates: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(PathBuf::from)
        .find(|candidate| repo_path.join(candidate).is_file())
}

fn explicit_file(repo_path: &Path, relative: &Path) -> Result<PathBuf> {
    if relative.is_absolute() || !repo_path.join(relative).is_file() {
        return Err(BuildError::InvalidConfig(format!(
            "File not found in source directory: {}",
            relative.display()
        )));
    }
    Ok(relative.to_path_buf())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = std::fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    std::fs::set_permissions(path, permissions)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Dockerfile の命令として扱うキーワード（FROM と MAINTAINER は除く）
const INSTRUCTIONS: [&str; 16] = [
    "RUN",
    "CMD",
    "ENTRYPOINT",
    "SHELL",
    "ENV",
    "ARG",
    "COPY",
    "ADD",
    "WORKDIR",
    "USER",
    "LABEL",
    "EXPOSE",
    "VOLUME",
    "STOPSIGNAL",
    "HEALTHCHECK",
    "ONBUILD",
];

/// ビルドステップを Dockerfile の1行にする
///
/// 命令で始まるステップはそのまま、それ以外はシェルコマンドとして RUN を付ける
fn build_step_line(step: &str) -> String {
    let step = step.trim();
    // 命令は大文字小文字を区別しない
    let keyword = step
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    if INSTRUCTIONS.contains(&keyword.as_str()) {
        step.to_string()
    } else {
        format!("RUN {}", step)
    }
}

/// Dockerfile のレンダラ
pub struct RecipeRenderer {
    tera: Tera,
    accelerator_bin: Option<String>,
}

impl RecipeRenderer {
    pub fn new(accelerator_bin: Option<String>) -> Self {
        Self {
            tera: Tera::default(),
            accelerator_bin,
        }
    }

    /// ソースディレクトリの依存関係ファイルを解決してレンダリング
    pub fn render(&mut self, spec: &BuildSpec) -> Result<String> {
        let files = DependencyFiles::resolve(spec)?;
        self.render_with(spec, &files)
    }

    /// 解決済みの依存関係ファイルを使ってレンダリング
    pub fn render_with(&mut self, spec: &BuildSpec, files: &DependencyFiles) -> Result<String> {
        let env_vars: Vec<EnvVar<'_>> = spec
            .env_vars
            .iter()
            .map(|(name, value)| EnvVar { name, value })
            .collect();

        let mut context = Context::new();
        context.insert("from_image", &spec.from_image);
        context.insert("env_vars", &env_vars);
        context.insert("workdir", &spec.workdir);
        context.insert("requirements", &files.requirements);
        context.insert("setup", &files.setup);
        context.insert("copy_code", &spec.copy_code);
        context.insert("folder_name", &spec.folder_name()?);
        let build_steps: Vec<String> = spec
            .build_steps
            .iter()
            .map(|step| build_step_line(step))
            .collect();
        context.insert("build_steps", &build_steps);
        context.insert("accelerator_bin", &self.accelerator_bin);

        let mut rendered = self.tera.render_str(DOCKERFILE_TEMPLATE, &context)?;
        if !rendered.ends_with('\n') {
            rendered.push('\n');
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn spec_in(root: &Path) -> BuildSpec {
        let repo = root.join("code");
        fs::create_dir_all(&repo).unwrap();
        BuildSpec::new("uuid1", "job", "python:3.7", repo)
    }

    /// 各行の位置を返す（見つからなければ panic）
    fn position(rendered: &str, needle: &str) -> usize {
        rendered
            .find(needle)
            .unwrap_or_else(|| panic!("{:?} not found in:\n{}", needle, rendered))
    }

    #[test]
    fn test_render_copy_code_and_build_step_order() {
        let temp_dir = tempdir().unwrap();
        let spec = spec_in(temp_dir.path())
            .with_copy_code(true)
            .with_build_steps(vec!["RUN echo hi".to_string()]);

        let rendered = RecipeRenderer::new(None).render(&spec).unwrap();

        let from = position(&rendered, "FROM python:3.7");
        let copy = position(&rendered, "COPY code /code");
        let step = position(&rendered, "RUN echo hi");
        assert!(from < copy);
        assert!(copy < step);
        assert!(!rendered.contains("pip install"));
        assert!(!rendered.contains("LD_LIBRARY_PATH"));
    }

    #[test]
    fn test_build_step_line() {
        assert_eq!(build_step_line("pip install torch"), "RUN pip install torch");
        assert_eq!(build_step_line("RUN echo hi"), "RUN echo hi");
        assert_eq!(build_step_line("  ENV A 1 "), "ENV A 1");
        assert_eq!(build_step_line("CMD python train.py"), "CMD python train.py");
        assert_eq!(
            build_step_line("ENTRYPOINT [\"python\"]"),
            "ENTRYPOINT [\"python\"]"
        );
        assert_eq!(build_step_line("run echo hi"), "run echo hi");
        assert_eq!(build_step_line("Copy a b"), "Copy a b");
    }

    #[test]
    fn test_render_without_copy_code() {
        let temp_dir = tempdir().unwrap();
        let spec = spec_in(temp_dir.path()).with_copy_code(false);

        let rendered = RecipeRenderer::new(None).render(&spec).unwrap();
        assert!(!rendered.contains("COPY code /code"));
        assert!(rendered.contains("WORKDIR /code"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let temp_dir = tempdir().unwrap();
        let spec = spec_in(temp_dir.path())
            .with_build_steps(vec!["pip install torch".to_string()])
            .with_env_vars(vec![("A".to_string(), "1".to_string())]);
        fs::write(spec.repo_path.join("requirements.txt"), "numpy").unwrap();

        let mut renderer = RecipeRenderer::new(Some("/usr/local/nvidia/bin".to_string()));
        let first = renderer.render(&spec).unwrap();
        let second = renderer.render(&spec).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_render_env_vars_in_order() {
        let temp_dir = tempdir().unwrap();
        let spec = spec_in(temp_dir.path()).with_env_vars(vec![
            ("ZETA".to_string(), "1".to_string()),
            ("ALPHA".to_string(), "2".to_string()),
        ]);

        let rendered = RecipeRenderer::new(None).render(&spec).unwrap();
        assert!(position(&rendered, "ENV ZETA 1") < position(&rendered, "ENV ALPHA 2"));
    }

    #[test]
    fn test_render_accelerator_path() {
        let temp_dir = tempdir().unwrap();
        let spec = spec_in(temp_dir.path());

        let rendered = RecipeRenderer::new(Some("/usr/local/nvidia/bin".to_string()))
            .render(&spec)
            .unwrap();
        assert!(rendered.contains("ENV LD_LIBRARY_PATH $LD_LIBRARY_PATH:/usr/local/nvidia/bin"));
    }

    #[test]
    fn test_requirements_primary_wins_over_fallback() {
        let temp_dir = tempdir().unwrap();
        let spec = spec_in(temp_dir.path());
        fs::write(spec.repo_path.join("dockerizer_requirements.txt"), "torch").unwrap();
        fs::write(spec.repo_path.join("requirements.txt"), "numpy").unwrap();

        let files = DependencyFiles::resolve(&spec).unwrap();
        let requirements = files.requirements.unwrap();
        assert_eq!(requirements.context_path, "code/dockerizer_requirements.txt");
        assert_eq!(requirements.file_name, "dockerizer_requirements.txt");
        assert!(files.setup.is_none());
    }

    #[test]
    fn test_requirements_fallback() {
        let temp_dir = tempdir().unwrap();
        let spec = spec_in(temp_dir.path());
        fs::write(spec.repo_path.join("requirements.txt"), "numpy").unwrap();

        let rendered = RecipeRenderer::new(None).render(&spec).unwrap();
        assert!(rendered.contains("COPY code/requirements.txt /code/requirements.txt"));
        assert!(rendered.contains("RUN pip install --no-cache-dir -r /code/requirements.txt"));
    }

    #[test]
    fn test_requirements_and_setup_are_independent() {
        let temp_dir = tempdir().unwrap();
        let spec = spec_in(temp_dir.path());
        fs::write(spec.repo_path.join("requirements.txt"), "numpy").unwrap();
        fs::write(spec.repo_path.join("dockerizer_setup.sh"), "#!/bin/sh").unwrap();
        fs::write(spec.repo_path.join("setup.sh"), "#!/bin/sh").unwrap();

        let files = DependencyFiles::resolve(&spec).unwrap();
        assert_eq!(files.requirements.unwrap().file_name, "requirements.txt");
        assert_eq!(files.setup.unwrap().file_name, "dockerizer_setup.sh");
    }

    #[cfg(unix)]
    #[test]
    fn test_setup_script_becomes_executable() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempdir().unwrap();
        let spec = spec_in(temp_dir.path());
        let script = spec.repo_path.join("setup.sh");
        fs::write(&script, "#!/bin/sh\necho setup").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();

        let rendered = RecipeRenderer::new(None).render(&spec).unwrap();
        assert!(rendered.contains("RUN /code/setup.sh"));

        let mode = fs::metadata(&script).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn test_explicit_requirements_path() {
        let temp_dir = tempdir().unwrap();
        let mut spec = spec_in(temp_dir.path());
        fs::create_dir_all(spec.repo_path.join("deps")).unwrap();
        fs::write(spec.repo_path.join("deps/prod.txt"), "numpy").unwrap();
        fs::write(spec.repo_path.join("requirements.txt"), "numpy").unwrap();
        spec.requirements_path = Some(PathBuf::from("deps/prod.txt"));

        let files = DependencyFiles::resolve(&spec).unwrap();
        assert_eq!(files.requirements.unwrap().context_path, "code/deps/prod.txt");
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let temp_dir = tempdir().unwrap();
        let mut spec = spec_in(temp_dir.path());
        spec.setup_path = Some(PathBuf::from("missing.sh"));

        assert!(matches!(
            DependencyFiles::resolve(&spec),
            Err(BuildError::InvalidConfig(_))
        ));
    }
}
