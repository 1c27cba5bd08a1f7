//! ソースアーカイブの HTTP ダウンロードと展開

use async_trait::async_trait;
use dockerizer_build::{BuildError, BuildResult, CodeFetcher};
use flate2::read::GzDecoder;
use std::fs::File;
use std::path::{Path, PathBuf};

/// ダウンロードしたアーカイブの一時ファイル名
const ARCHIVE_NAME: &str = "_code";

pub struct HttpCodeFetcher {
    client: reqwest::Client,
    internal_header: String,
}

impl HttpCodeFetcher {
    pub fn new(internal_header: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            internal_header: internal_header.into(),
        }
    }
}

#[async_trait]
impl CodeFetcher for HttpCodeFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> BuildResult<Option<PathBuf>> {
        let response = self
            .client
            .get(url)
            .header(self.internal_header.as_str(), "dockerizer")
            .send()
            .await
            .map_err(|e| BuildError::Download(e.to_string()))?;

        if !response.status().is_success() {
            tracing::warn!("Download of {} returned {}", url, response.status());
            return Ok(None);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| BuildError::Download(e.to_string()))?;

        std::fs::create_dir_all(destination)?;
        let archive = destination.join(ARCHIVE_NAME);
        std::fs::write(&archive, &body)?;
        tracing::debug!("Downloaded {} bytes to {}", body.len(), archive.display());

        let result = extract_archive(&archive, destination);
        if let Err(e) = std::fs::remove_file(&archive) {
            tracing::warn!("Failed to delete {}: {}", archive.display(), e);
        }
        result?;

        Ok(Some(destination.to_path_buf()))
    }
}

/// tar.gz を展開する
pub fn extract_archive(archive: &Path, destination: &Path) -> BuildResult<()> {
    let file = File::open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    tar.unpack(destination)?;
    Ok(())
}
