//! Finished artifacts on disk.
//!
//! Layout under the storage temp folder:
//!
//! | Kind               | Path                          |
//! |--------------------|-------------------------------|
//! | `create_map`       | `maps/<id>/map.pdf`           |
//! | `map_preview`      | `map_previews/<id>.png`       |
//! | `map_reambulation` | `reambulations/<id>.zip`      |

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

use crate::job::{JobKind, is_valid_run_id};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("File not found")]
    NotFound,
    #[error("Path traversal detected")]
    Traversal,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn maps_dir(&self) -> PathBuf {
        self.root.join("maps")
    }

    /// Where the worker writes the artifact for `kind` and `id`.
    pub fn path_for(&self, kind: JobKind, id: &str) -> PathBuf {
        match kind {
            JobKind::CreateMap => self.maps_dir().join(id).join("map.pdf"),
            JobKind::MapPreview => self.root.join("map_previews").join(format!("{}.png", id)),
            JobKind::MapReambulation => {
                self.root.join("reambulations").join(format!("{}.zip", id))
            }
        }
    }

    /// The artifact's path if it has already been produced.
    pub fn cached(&self, kind: JobKind, id: &str) -> Option<PathBuf> {
        let path = self.path_for(kind, id);
        path.is_file().then_some(path)
    }

    pub fn content_type(kind: JobKind) -> &'static str {
        match kind {
            JobKind::CreateMap => "application/pdf",
            JobKind::MapPreview => "image/png",
            JobKind::MapReambulation => "application/zip",
        }
    }

    /// Create the per-kind output directories.
    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.maps_dir(),
            self.root.join("map_previews"),
            self.root.join("reambulations"),
        ] {
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    /// Resolve `maps/<id>/<file>`, refusing anything outside `maps/`.
    pub fn map_file(&self, id: &str, file: &str) -> Result<PathBuf, ArtifactError> {
        if !is_valid_run_id(id) {
            return Err(ArtifactError::NotFound);
        }
        let mut components = Path::new(file).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => return Err(ArtifactError::Traversal),
        }

        let maps_dir = self.maps_dir();
        let path = maps_dir.join(id).join(file);
        let resolved = path.canonicalize().map_err(|_| ArtifactError::NotFound)?;
        let base = maps_dir.canonicalize().map_err(|_| ArtifactError::NotFound)?;
        if !resolved.starts_with(&base) {
            return Err(ArtifactError::Traversal);
        }
        if !resolved.is_file() {
            return Err(ArtifactError::NotFound);
        }
        Ok(resolved)
    }
}
