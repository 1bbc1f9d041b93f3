//! Packing and pre-packing of extension zipfiles.
//!
//! Writing extension source code into a zipfile is fast; vendored wheels are
//! what dominates build time. The wheels therefore go into a cached
//! "pre-pack" archive per cell, which a final pack copies and extends with
//! the manifest, the optional init settings, and the extension source.

use crate::spec::ExtensionSource;
use anyhow::{bail, Context};
use fs_err::File;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

fn zip_entry_name(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn deflated() -> FileOptions {
    FileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Entries already present in an existing pre-pack that are still wanted.
///
/// Deleting a single entry from a zip archive is avoided; when any existing
/// entry is no longer desired the whole pre-pack is deleted and rebuilt.
pub fn existing_prepacked_files(
    files_to_prepack: &BTreeMap<PathBuf, PathBuf>,
    path_zip_prepack: &Path,
) -> anyhow::Result<BTreeSet<PathBuf>> {
    if !path_zip_prepack.is_file() {
        return Ok(BTreeSet::new());
    }
    let archive = ZipArchive::new(File::open(path_zip_prepack)?)?;
    let existing: BTreeSet<PathBuf> = archive.file_names().map(PathBuf::from).collect();

    let desired: BTreeSet<&PathBuf> = files_to_prepack.values().collect();
    if existing.iter().any(|entry| !desired.contains(entry)) {
        debug!(
            "Pre-pack at {} contains stale entries, rebuilding",
            path_zip_prepack.display()
        );
        fs_err::remove_file(path_zip_prepack)?;
        return Ok(BTreeSet::new());
    }
    Ok(existing)
}

/// Write the missing files of `files_to_prepack` into the pre-pack archive.
///
/// Files are written in ascending on-disk size to keep memory peaks small.
/// Returns whether anything was written; an up-to-date pre-pack touches no
/// files.
pub fn prepack_extension(
    files_to_prepack: &BTreeMap<PathBuf, PathBuf>,
    path_zip_prepack: &Path,
    mut cb_pre_file_write: impl FnMut(&Path, &Path),
    mut cb_post_file_write: impl FnMut(&Path, &Path),
) -> anyhow::Result<bool> {
    let existing = existing_prepacked_files(files_to_prepack, path_zip_prepack)?;
    let mut remaining: Vec<(&PathBuf, &PathBuf)> = files_to_prepack
        .iter()
        .filter(|(_, zip_path)| !existing.contains(*zip_path))
        .collect();
    if remaining.is_empty() && path_zip_prepack.is_file() {
        debug!("Pre-pack at {} is up to date", path_zip_prepack.display());
        return Ok(false);
    }

    if let Some(parent) = path_zip_prepack.parent() {
        fs_err::create_dir_all(parent)?;
    }
    let mut writer = if path_zip_prepack.is_file() {
        ZipWriter::new_append(
            fs_err::OpenOptions::new()
                .read(true)
                .write(true)
                .open(path_zip_prepack)?
                .into_parts()
                .0,
        )?
    } else {
        ZipWriter::new(File::create(path_zip_prepack)?.into_parts().0)
    };

    let mut file_sizes = BTreeMap::new();
    for (path, _) in &remaining {
        file_sizes.insert(
            (*path).clone(),
            fs_err::metadata(path.as_path())
                .with_context(|| format!("Missing file to pre-pack: {}", path.display()))?
                .len(),
        );
    }
    remaining.sort_by_key(|(path, _)| file_sizes[*path]);

    for (path, zip_path) in remaining {
        cb_pre_file_write(path, zip_path);
        writer.start_file(zip_entry_name(zip_path), deflated())?;
        let mut file = File::open(path)?;
        std::io::copy(&mut file, &mut writer)?;
        cb_post_file_write(path, zip_path);
    }
    writer.finish()?;
    Ok(true)
}

/// Assemble the installable extension archive for one cell: the pre-pack's
/// wheels plus the manifest, the optional init settings, and the extension
/// source.
pub fn pack_extension(
    manifest_filename: &str,
    manifest_toml: &str,
    init_settings: Option<(&str, &str)>,
    source: &ExtensionSource,
    path_zip_prepack: &Path,
    path_zip: &Path,
    overwrite: bool,
) -> anyhow::Result<()> {
    if !path_zip_prepack.is_file() {
        bail!(
            "Cannot pack the extension, no pre-packed archive was found at {}",
            path_zip_prepack.display()
        );
    }
    if path_zip.is_file() {
        if !overwrite {
            bail!(
                "A file already exists where the extension zip is to be built: {}",
                path_zip.display()
            );
        }
        fs_err::remove_file(path_zip)?;
    }
    if let Some(parent) = path_zip.parent() {
        fs_err::create_dir_all(parent)?;
    }
    fs_err::copy(path_zip_prepack, path_zip)?;

    let mut writer = ZipWriter::new_append(
        fs_err::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path_zip)?
            .into_parts()
            .0,
    )?;

    debug!("Writing {}", manifest_filename);
    writer.start_file(manifest_filename, deflated())?;
    writer.write_all(manifest_toml.as_bytes())?;

    if let Some((init_settings_filename, init_settings_toml)) = init_settings {
        debug!("Writing {}", init_settings_filename);
        writer.start_file(init_settings_filename, deflated())?;
        writer.write_all(init_settings_toml.as_bytes())?;
    }

    match source {
        ExtensionSource::Project { path_package } => {
            debug!("Writing the extension package from {}", path_package.display());
            for entry in WalkDir::new(path_package).sort_by_file_name() {
                let entry = entry.map_err(|err| {
                    anyhow::anyhow!(
                        "Failed to walk the extension package at {}: {}",
                        path_package.display(),
                        err,
                    )
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(path_package)
                    .context("Walked file escapes the extension package")?;
                writer.start_file(zip_entry_name(relative), deflated())?;
                let mut file = File::open(entry.path())?;
                std::io::copy(&mut file, &mut writer)?;
            }
        }
        ExtensionSource::Script { path_script } => {
            debug!("Writing {} as __init__.py", path_script.display());
            let mut source_code = String::new();
            File::open(path_script)?.read_to_string(&mut source_code)?;
            writer.start_file("__init__.py", deflated())?;
            writer.write_all(source_code.as_bytes())?;
        }
    }
    writer.finish()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;

    fn write_file(path: &Path, content: &[u8]) {
        fs_err::create_dir_all(path.parent().unwrap()).unwrap();
        fs_err::write(path, content).unwrap();
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        names
    }

    fn wheel_map(dir: &Path, filenames: &[&str]) -> BTreeMap<PathBuf, PathBuf> {
        filenames
            .iter()
            .map(|filename| {
                (
                    dir.join(filename),
                    Path::new("wheels").join(filename),
                )
            })
            .collect()
    }

    #[test]
    fn prepack_reuse_and_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let wheels_dir = dir.path().join("wheels");
        write_file(&wheels_dir.join("a-1.0-py3-none-any.whl"), b"aaaa");
        write_file(&wheels_dir.join("b-1.0-py3-none-any.whl"), b"bb");
        let path_prepack = dir.path().join("prepack.zip");

        let both = wheel_map(
            &wheels_dir,
            &["a-1.0-py3-none-any.whl", "b-1.0-py3-none-any.whl"],
        );
        assert!(prepack_extension(&both, &path_prepack, |_, _| {}, |_, _| {}).unwrap());
        assert_eq!(
            entry_names(&path_prepack),
            vec![
                "wheels/a-1.0-py3-none-any.whl",
                "wheels/b-1.0-py3-none-any.whl",
            ],
        );

        // Already up to date: nothing is written.
        assert!(!prepack_extension(&both, &path_prepack, |_, _| {}, |_, _| {}).unwrap());

        // Dropping a wheel forces a full rebuild without the stale entry.
        let only_a = wheel_map(&wheels_dir, &["a-1.0-py3-none-any.whl"]);
        assert!(prepack_extension(&only_a, &path_prepack, |_, _| {}, |_, _| {}).unwrap());
        assert_eq!(
            entry_names(&path_prepack),
            vec!["wheels/a-1.0-py3-none-any.whl"],
        );
    }

    #[test]
    fn prepack_writes_smallest_files_first() {
        let dir = tempfile::tempdir().unwrap();
        let wheels_dir = dir.path().join("wheels");
        write_file(&wheels_dir.join("big-1.0-py3-none-any.whl"), &[0u8; 4096]);
        write_file(&wheels_dir.join("small-1.0-py3-none-any.whl"), b"s");
        let path_prepack = dir.path().join("prepack.zip");

        let mut order = Vec::new();
        let files = wheel_map(
            &wheels_dir,
            &["big-1.0-py3-none-any.whl", "small-1.0-py3-none-any.whl"],
        );
        prepack_extension(
            &files,
            &path_prepack,
            |path, _| order.push(path.file_name().unwrap().to_string_lossy().to_string()),
            |_, _| {},
        )
        .unwrap();
        assert_eq!(
            order,
            vec!["small-1.0-py3-none-any.whl", "big-1.0-py3-none-any.whl"],
        );
    }

    #[test]
    fn pack_script_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path_script = dir.path().join("my_script.py");
        write_file(&path_script, b"import bpy\n");
        let path_prepack = dir.path().join("prepack.zip");
        prepack_extension(&BTreeMap::new(), &path_prepack, |_, _| {}, |_, _| {}).unwrap();

        let path_zip = dir.path().join("out.zip");
        pack_extension(
            "blender_manifest.toml",
            "schema_version = \"1.0.0\"\n",
            Some(("init_settings.toml", "use_log_file = false\n")),
            &ExtensionSource::Script {
                path_script: path_script.clone(),
            },
            &path_prepack,
            &path_zip,
            false,
        )
        .unwrap();
        assert_eq!(
            entry_names(&path_zip),
            vec!["__init__.py", "blender_manifest.toml", "init_settings.toml"],
        );

        // Existing target without overwrite is fatal; with overwrite it isn't.
        assert!(pack_extension(
            "blender_manifest.toml",
            "",
            None,
            &ExtensionSource::Script { path_script },
            &path_prepack,
            &path_zip,
            false,
        )
        .is_err());
    }

    #[test]
    fn pack_project_extension_preserves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path_package = dir.path().join("my_ext");
        write_file(&path_package.join("__init__.py"), b"def register(): pass\n");
        write_file(&path_package.join("operators/move.py"), b"x = 1\n");
        let path_prepack = dir.path().join("prepack.zip");
        let wheels_dir = dir.path().join("wheels");
        write_file(&wheels_dir.join("a-1.0-py3-none-any.whl"), b"aaaa");
        prepack_extension(
            &wheel_map(&wheels_dir, &["a-1.0-py3-none-any.whl"]),
            &path_prepack,
            |_, _| {},
            |_, _| {},
        )
        .unwrap();

        let path_zip = dir.path().join("out.zip");
        pack_extension(
            "blender_manifest.toml",
            "schema_version = \"1.0.0\"\n",
            None,
            &ExtensionSource::Project { path_package },
            &path_prepack,
            &path_zip,
            false,
        )
        .unwrap();
        assert_eq!(
            entry_names(&path_zip),
            vec![
                "__init__.py",
                "blender_manifest.toml",
                "operators/move.py",
                "wheels/a-1.0-py3-none-any.whl",
            ],
        );
    }
}
