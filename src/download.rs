//! Parallel wheel downloads with progress callbacks and cooperative abort.
//!
//! The core only decides *what* to fetch; this collaborator fans the fetches
//! out over a worker pool. Callbacks fire on the worker threads. The abort
//! flag is observed between chunks; on abort, partial files are deleted.

use anyhow::{bail, Context};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::NamedTempFile;
use tracing::debug;
use wheel_compat_rs::Wheel;

const DOWNLOAD_CHUNK_BYTES: usize = 32768;

/// Download a single wheel to `path_wheels/<filename>`.
///
/// The fetch streams into a temporary file that is only persisted once the
/// hash matches; a failed verification deletes the download and is fatal.
fn download_wheel(
    wheel: &Wheel,
    path_wheels: &Path,
    abort: &AtomicBool,
    on_progress: &(impl Fn(&Wheel, &Path, u64) + Sync),
) -> anyhow::Result<bool> {
    let target_file = path_wheels.join(wheel.filename()?);
    debug!("Downloading wheel to {}", target_file.display());

    let mut temp_file = NamedTempFile::new_in(path_wheels)
        .context("Couldn't create a file for the download")?;
    let response = ureq::get(&wheel.url)
        .set("User-Agent", env!("CARGO_PKG_NAME"))
        .call()
        .with_context(|| format!("Failed to fetch {}", wheel.url))?;
    let mut reader = response.into_reader();

    let mut buffer = [0u8; DOWNLOAD_CHUNK_BYTES];
    loop {
        if abort.load(Ordering::Relaxed) {
            // NamedTempFile cleans the partial file up on drop.
            return Ok(false);
        }
        let bytes_read = reader
            .read(&mut buffer)
            .with_context(|| format!("Failed while downloading {}", wheel.url))?;
        if bytes_read == 0 {
            break;
        }
        temp_file.write_all(&buffer[..bytes_read])?;
        on_progress(wheel, &target_file, bytes_read as u64);
    }

    temp_file
        .persist(&target_file)
        .context("Failed to move the downloaded wheel into the wheel cache")?;
    if !wheel.is_download_valid(&target_file)? {
        fs_err::remove_file(&target_file)?;
        bail!(
            "Hash of the wheel downloaded from {} did not match the expected hash {}",
            wheel.url,
            wheel.hash,
        );
    }
    Ok(true)
}

/// Fetch every given wheel into `path_wheels`, in parallel.
///
/// `on_start(wheel, path)` and `on_finish(wheel, path)` run once per wheel,
/// `on_progress(wheel, path, bytes_written)` once per chunk, all on worker
/// threads. The first failure sets `abort` so that in-flight fetches stop,
/// then surfaces as the error.
pub fn download_wheels(
    wheels: &[Wheel],
    path_wheels: &Path,
    abort: &AtomicBool,
    on_start: impl Fn(&Wheel, &Path) + Sync,
    on_progress: impl Fn(&Wheel, &Path, u64) + Sync,
    on_finish: impl Fn(&Wheel, &Path) + Sync,
) -> anyhow::Result<()> {
    fs_err::create_dir_all(path_wheels)?;
    let results: Vec<anyhow::Result<bool>> = wheels
        .par_iter()
        .map(|wheel| {
            let target_file = path_wheels.join(wheel.filename()?);
            on_start(wheel, &target_file);
            let result = download_wheel(wheel, path_wheels, abort, &on_progress);
            match &result {
                Ok(true) => on_finish(wheel, &target_file),
                Ok(false) => {}
                Err(_) => abort.store(true, Ordering::Relaxed),
            }
            result
        })
        .collect();

    let mut completed = 0;
    for result in results {
        if result? {
            completed += 1;
        }
    }
    if completed < wheels.len() {
        bail!("Wheel downloads were aborted before completion");
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use sha2::{Digest, Sha256};

    #[test]
    fn failed_verification_deletes_the_file() {
        // A file:// style fetch isn't supported by the HTTP client, so this
        // exercises the error path: the fetch fails, abort is set, and no
        // partial file survives in the wheel cache.
        let dir = tempfile::tempdir().unwrap();
        let wheel = Wheel {
            url: "http://127.0.0.1:9/unreachable/a-1.0-py3-none-any.whl".to_string(),
            registry: "http://127.0.0.1:9".to_string(),
            hash: format!("sha256:{:x}", Sha256::digest(b"content")),
            size: 7,
        };
        let abort = AtomicBool::new(false);
        let result = download_wheels(
            &[wheel],
            dir.path(),
            &abort,
            |_, _| {},
            |_, _, _| {},
            |_, _| {},
        );
        assert!(result.is_err());
        assert!(abort.load(Ordering::Relaxed));
        assert!(!dir.path().join("a-1.0-py3-none-any.whl").exists());
    }

    #[test]
    fn preset_abort_downloads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let abort = AtomicBool::new(true);
        // With no wheels to fetch the pool drains immediately and succeeds.
        download_wheels(&[], dir.path(), &abort, |_, _| {}, |_, _, _| {}, |_, _| {}).unwrap();
    }
}
