//! Tar and gzip packing for cache entries and directory artifacts.

use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use wheelwright_core::{Error, Result};

/// Pack paths into a gzip-compressed tar archive.
///
/// Relative paths are resolved against `base_dir` and keep their relative
/// name inside the archive. Paths that do not exist are skipped, so a
/// cache save never fails on a directory the steps chose not to create.
pub fn pack(paths: &[PathBuf], base_dir: &Path) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for p in paths {
        let abs_path = if p.is_absolute() {
            p.clone()
        } else {
            base_dir.join(p)
        };
        if !abs_path.exists() {
            continue;
        }
        let name = if p.is_absolute() {
            p.strip_prefix(base_dir).unwrap_or(p)
        } else {
            p.as_path()
        };
        if abs_path.is_dir() {
            builder
                .append_dir_all(name, &abs_path)
                .map_err(|e| Error::CacheStore(format!("failed to pack dir: {}", e)))?;
        } else {
            builder
                .append_path_with_name(&abs_path, name)
                .map_err(|e| Error::CacheStore(format!("failed to pack file: {}", e)))?;
        }
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| Error::CacheStore(format!("failed to finish tar: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| Error::CacheStore(format!("failed to finish gzip: {}", e)))
}

/// Unpack an archive produced by [`pack`] into a destination directory.
pub fn unpack(data: &[u8], dest: &Path) -> Result<()> {
    let decoder = GzDecoder::new(data);
    let mut archive = tar::Archive::new(decoder);
    archive
        .unpack(dest)
        .map_err(|e| Error::CacheStore(format!("failed to unpack archive: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_roundtrip() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join(".pip-cache/wheels")).unwrap();
        std::fs::write(src.path().join(".pip-cache/wheels/a.whl"), b"wheel-a").unwrap();
        std::fs::write(src.path().join("lockfile"), b"pinned").unwrap();

        let data = pack(
            &[PathBuf::from(".pip-cache"), PathBuf::from("lockfile")],
            src.path(),
        )
        .unwrap();
        assert!(!data.is_empty());

        let dest = tempfile::tempdir().unwrap();
        unpack(&data, dest.path()).unwrap();

        let restored = std::fs::read(dest.path().join(".pip-cache/wheels/a.whl")).unwrap();
        assert_eq!(restored, b"wheel-a");
        let lockfile = std::fs::read(dest.path().join("lockfile")).unwrap();
        assert_eq!(lockfile, b"pinned");
    }

    #[test]
    fn test_pack_skips_missing_paths() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("present"), b"x").unwrap();

        let data = pack(
            &[PathBuf::from("present"), PathBuf::from("absent")],
            src.path(),
        )
        .unwrap();

        let dest = tempfile::tempdir().unwrap();
        unpack(&data, dest.path()).unwrap();
        assert!(dest.path().join("present").exists());
        assert!(!dest.path().join("absent").exists());
    }
}
