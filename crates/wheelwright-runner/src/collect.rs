//! Collecting artifact payloads left on disk by steps.

use std::path::{Path, PathBuf};

use wheelwright_core::{Error, Result};

/// Read an artifact payload from `path`, resolved against `base_dir`.
///
/// A file is read as-is; a directory is packed into a gzip tar archive
/// named `<dir>.tar.gz`. Returns the artifact file name and its bytes.
pub async fn collect_artifact(path: &Path, base_dir: &Path) -> Result<(String, Vec<u8>)> {
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    };
    if !abs.exists() {
        return Err(Error::Release(format!(
            "artifact path '{}' does not exist",
            path.display()
        )));
    }

    let name = abs
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::Release(format!(
                "artifact path '{}' has no file name",
                path.display()
            ))
        })?;

    if abs.is_dir() {
        let parent = abs
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        let entries = vec![PathBuf::from(&name)];
        let data = tokio::task::spawn_blocking(move || wheelwright_cache::pack(&entries, &parent))
            .await
            .map_err(|e| Error::Internal(format!("archive task failed: {}", e)))??;
        Ok((format!("{}.tar.gz", name), data))
    } else {
        let data = tokio::fs::read(&abs).await?;
        Ok((name, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("dist")).unwrap();
        std::fs::write(dir.path().join("dist/pkg.whl"), b"wheel").unwrap();

        let (name, data) = collect_artifact(Path::new("dist/pkg.whl"), dir.path())
            .await
            .unwrap();
        assert_eq!(name, "pkg.whl");
        assert_eq!(data, b"wheel");
    }

    #[tokio::test]
    async fn test_collect_directory_packs_archive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("dist")).unwrap();
        std::fs::write(dir.path().join("dist/a.whl"), b"a").unwrap();
        std::fs::write(dir.path().join("dist/b.whl"), b"b").unwrap();

        let (name, data) = collect_artifact(Path::new("dist"), dir.path())
            .await
            .unwrap();
        assert_eq!(name, "dist.tar.gz");

        let out = tempfile::tempdir().unwrap();
        wheelwright_cache::unpack(&data, out.path()).unwrap();
        assert!(out.path().join("dist/a.whl").exists());
        assert!(out.path().join("dist/b.whl").exists());
    }

    #[tokio::test]
    async fn test_collect_missing_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = collect_artifact(Path::new("dist/absent.whl"), dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
