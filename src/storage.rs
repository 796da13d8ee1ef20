//! Upload directory handling: canonical files on disk, originals removed.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;
use crate::normalizer::{CANONICAL_EXTENSION, CanonicalImage, normalize};

const FALLBACK_STEM: &str = "upload";

/// Reduce a client-supplied filename to a safe single path component.
///
/// Path separators become spaces, whitespace runs become `_`, anything outside
/// `[A-Za-z0-9._-]` is dropped and leading/trailing dots and underscores are trimmed.
pub fn sanitize_filename(name: &str) -> String {
    let spaced: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

#[derive(Debug, Clone)]
pub struct StoredImage {
    pub path: PathBuf,
    pub image: CanonicalImage,
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Canonical path for an upload: `<dir>/<sanitized stem>.jpeg`.
    pub fn canonical_path(&self, original_name: &str) -> PathBuf {
        let sanitized = sanitize_filename(original_name);
        let stem = Path::new(&sanitized)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(FALLBACK_STEM)
            .to_string();
        self.dir.join(format!("{stem}.{CANONICAL_EXTENSION}"))
    }

    /// Save the upload, write its canonical form next to it and remove the original.
    ///
    /// The original is always removed, whether or not it decoded. An upload whose
    /// name collides with its canonical path is staged under a unique hidden name so
    /// a failed decode never clobbers an existing canonical file.
    pub async fn store_canonical(&self, original_name: &str, bytes: &[u8]) -> Result<StoredImage> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let sanitized = sanitize_filename(original_name);
        let sanitized = if sanitized.is_empty() {
            FALLBACK_STEM.to_string()
        } else {
            sanitized
        };
        let canonical_path = self.canonical_path(original_name);
        let mut original_path = self.dir.join(&sanitized);
        if original_path == canonical_path {
            original_path = self
                .dir
                .join(format!(".{}-{}", uuid::Uuid::new_v4(), sanitized));
        }

        tokio::fs::write(&original_path, bytes).await?;
        let normalized = normalize(bytes);

        let result: Result<CanonicalImage> = match normalized {
            Ok(image) => tokio::fs::write(&canonical_path, image.as_bytes())
                .await
                .map(|_| image)
                .map_err(Into::into),
            Err(err) => Err(err),
        };

        if let Err(e) = tokio::fs::remove_file(&original_path).await {
            warn!(path = %original_path.display(), "failed to remove original upload: {}", e);
        }

        let image = result?;
        debug!(path = %canonical_path.display(), "stored canonical image");
        Ok(StoredImage {
            path: canonical_path,
            image,
        })
    }
}
