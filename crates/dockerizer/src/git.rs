use async_trait::async_trait;
use dockerizer_build::{BuildError, BuildResult, VersionControl};
use std::path::Path;
use tokio::process::Command;

/// `git checkout` でソースツリーを切り替える
#[derive(Debug, Default, Clone)]
pub struct GitCheckout;

#[async_trait]
impl VersionControl for GitCheckout {
    async fn checkout(&self, repo_path: &Path, commit: &str) -> BuildResult<()> {
        let checkout_failed = |message: String| BuildError::Checkout {
            path: repo_path.to_path_buf(),
            commit: commit.to_string(),
            message,
        };

        let output = Command::new("git")
            .arg("-C")
            .arg(repo_path)
            .arg("checkout")
            .arg(commit)
            .output()
            .await
            .map_err(|e| checkout_failed(e.to_string()))?;

        if !output.status.success() {
            return Err(checkout_failed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        tracing::debug!("Checked out {} in {}", commit, repo_path.display());
        Ok(())
    }
}
