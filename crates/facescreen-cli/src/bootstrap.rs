//! Landmark model download.

use anyhow::{Context, Result};
use bzip2::read::BzDecoder;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const LANDMARK_MODEL_URL: &str = "http://dlib.net/files/shape_predictor_68_face_landmarks.dat.bz2";

#[derive(Debug, PartialEq)]
pub enum FetchOutcome {
    AlreadyPresent(PathBuf),
    Installed { path: PathBuf, bytes: u64 },
}

/// Download the bzip2-compressed landmark model and install it at `dest`.
pub async fn fetch_landmarks(url: &str, dest: &Path, force: bool) -> Result<FetchOutcome> {
    if dest.exists() && !force {
        return Ok(FetchOutcome::AlreadyPresent(dest.to_path_buf()));
    }

    tracing::info!(url, dest = %dest.display(), "downloading landmark model");
    let compressed = reqwest::get(url)
        .await
        .with_context(|| format!("requesting {url}"))?
        .error_for_status()?
        .bytes()
        .await
        .context("reading response body")?;
    tracing::debug!(compressed = compressed.len(), "download complete");

    let target = dest.to_path_buf();
    let bytes = tokio::task::spawn_blocking(move || install_bz2(&compressed, &target)).await??;

    Ok(FetchOutcome::Installed {
        path: dest.to_path_buf(),
        bytes,
    })
}

/// Decompress `compressed` into `dest`, replacing it atomically.
///
/// Returns the decompressed size.
pub fn install_bz2(compressed: &[u8], dest: &Path) -> Result<u64> {
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    let bytes = io::copy(&mut BzDecoder::new(compressed), &mut tmp).context("decompressing bzip2 stream")?;
    tmp.persist(dest)
        .with_context(|| format!("installing {}", dest.display()))?;

    tracing::info!(path = %dest.display(), bytes, "landmark model installed");
    Ok(bytes)
}
