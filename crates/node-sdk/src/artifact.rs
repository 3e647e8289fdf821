//! Scoped temporary files for captured media.

use std::io;
use std::path::Path;

use tempfile::TempPath;

/// A staged capture file, deleted when dropped.
///
/// Providers write into [`path`](Self::path); the runtime reads the bytes back
/// and drops the artifact on every exit path.
#[derive(Debug)]
pub struct TempArtifact {
    path: TempPath,
}

impl TempArtifact {
    /// Reserve an empty file in `dir` ending in `.{extension}`.
    pub fn create(dir: &Path, extension: &str) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let file = tempfile::Builder::new()
            .prefix("nb-capture-")
            .suffix(&format!(".{extension}"))
            .tempfile_in(dir)?;
        Ok(Self {
            path: file.into_temp_path(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = TempArtifact::create(dir.path(), "jpg").unwrap();
        let path = artifact.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(path.extension().unwrap(), "jpg");

        tokio::fs::write(&path, b"frame").await.unwrap();
        assert_eq!(artifact.read().await.unwrap(), b"frame");

        drop(artifact);
        assert!(!path.exists());
    }
}
