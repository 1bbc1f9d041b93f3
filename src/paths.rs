//! Cache layout: three sibling directories per project.
//!
//! The cache root lives inside the project directory when writable, and
//! falls back to a per-user cache directory keyed by a hash of the resolved
//! descriptor path otherwise. All cache contents are content-derived, so
//! concurrent invocations may race without corruption: the last writer wins
//! and hashes are verified on read.

use anyhow::Context;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

const CACHE_DIR_NAME: &str = ".blendpack_cache";

/// The three caches of one project.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CachePaths {
    /// Downloaded wheels, filename-addressed.
    pub wheel_cache: PathBuf,
    /// One pre-packed archive per cell, named like the final archive.
    pub prepack_cache: PathBuf,
    /// Final archives.
    pub build_cache: PathBuf,
}

impl CachePaths {
    /// Resolve and create the caches for the project behind `path_descriptor`.
    pub fn new(path_descriptor: &Path) -> anyhow::Result<Self> {
        let project_dir = path_descriptor
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let cache_root = match try_writable(&project_dir.join(CACHE_DIR_NAME)) {
            Ok(cache_root) => cache_root,
            Err(err) => {
                debug!(
                    "Project directory {} is not writable ({}), using the user cache dir",
                    project_dir.display(),
                    err
                );
                let resolved = fs_err::canonicalize(path_descriptor)
                    .unwrap_or_else(|_| path_descriptor.to_path_buf());
                let digest = Sha256::digest(resolved.to_string_lossy().as_bytes());
                let user_cache = dirs::cache_dir()
                    .context("System needs to have a cache dir")?
                    .join(env!("CARGO_PKG_NAME"))
                    .join(format!("{:x}", digest)[..16].to_string());
                try_writable(&user_cache)?
            }
        };

        let paths = CachePaths {
            wheel_cache: cache_root.join("wheel_cache"),
            prepack_cache: cache_root.join("prepack_cache"),
            build_cache: cache_root.join("build_cache"),
        };
        fs_err::create_dir_all(&paths.wheel_cache)?;
        fs_err::create_dir_all(&paths.prepack_cache)?;
        fs_err::create_dir_all(&paths.build_cache)?;
        Ok(paths)
    }
}

fn try_writable(dir: &Path) -> io::Result<PathBuf> {
    fs_err::create_dir_all(dir)?;
    // Creating the directory can succeed on a read-only parent cache; probe
    // with an actual write.
    let probe = dir.join(".write_probe");
    fs_err::write(&probe, b"")?;
    fs_err::remove_file(&probe)?;
    Ok(dir.to_path_buf())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn caches_live_inside_the_project() {
        let dir = tempfile::tempdir().unwrap();
        let path_descriptor = dir.path().join("pyproject.toml");
        fs_err::write(&path_descriptor, "").unwrap();
        let paths = CachePaths::new(&path_descriptor).unwrap();
        assert!(paths.wheel_cache.starts_with(dir.path()));
        assert!(paths.wheel_cache.is_dir());
        assert!(paths.prepack_cache.is_dir());
        assert!(paths.build_cache.is_dir());
        assert_eq!(
            paths.prepack_cache.parent(),
            paths.build_cache.parent(),
        );
    }
}
