use crate::error::{BuildError, BuildResult};
use crate::spec::DOCKERFILE_NAME;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::path::Path;
use tar::Builder;

pub struct ContextBuilder;

impl ContextBuilder {
    /// ビルドコンテキストをtar.gzアーカイブとして作成
    ///
    /// レンダリング済みの Dockerfile はコンテキスト直下に置かれている前提
    pub fn create_context(context_path: &Path) -> BuildResult<Vec<u8>> {
        tracing::debug!("Creating build context from: {}", context_path.display());

        if !context_path.is_dir() {
            return Err(BuildError::ContextNotFound(context_path.to_path_buf()));
        }
        if !context_path.join(DOCKERFILE_NAME).is_file() {
            return Err(BuildError::InvalidConfig(format!(
                "{} not found in build context {}",
                DOCKERFILE_NAME,
                context_path.display()
            )));
        }

        let mut archive_data = Vec::new();
        {
            let encoder = GzEncoder::new(&mut archive_data, Compression::default());
            let mut tar = Builder::new(encoder);

            // シンボリックリンクはリンクのまま追加する
            tar.follow_symlinks(false);
            tar.append_dir_all(".", context_path)?;

            tar.into_inner()?.finish()?;
        }

        tracing::debug!("Build context created: {} bytes", archive_data.len());

        Self::check_context_size(archive_data.len());

        Ok(archive_data)
    }

    /// コンテキストサイズのチェックと警告
    fn check_context_size(size: usize) {
        const MAX_CONTEXT_SIZE: usize = 500 * 1024 * 1024; // 500MB

        if size > MAX_CONTEXT_SIZE {
            tracing::warn!(
                "Build context is large ({}MB), consider excluding files from the source archive",
                size / 1024 / 1024
            );
        }
    }
}
