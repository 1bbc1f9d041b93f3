use crate::blender::{find_blender_exe, run_extension, validate_extension};
use crate::download::download_wheels;
use crate::paths::CachePaths;
use crate::spec::{BLExtSpec, BuildPlan};
use crate::uv::{ensure_lockfile, rewrite_vendored_extras, update_lockfile};
use crate::{pack, profiles};
use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Eq, PartialEq, clap::ValueEnum)]
pub enum ManifestFormat {
    Toml,
    Json,
}

#[derive(Parser)]
pub enum Cli {
    /// Build one installable extension archive per (Blender version,
    /// platform) cell, vendoring all wheel dependencies.
    Build {
        /// Path to `pyproject.toml`, a `.py` script with inline metadata, or
        /// the directory containing them
        path: Option<PathBuf>,
        /// Release profile to bake into the archive as `init_settings.toml`
        #[clap(long)]
        profile: Option<String>,
        /// Replace existing archives at the target paths
        #[clap(long)]
        overwrite: bool,
        /// Run `blender --command extension validate` over each built archive
        #[clap(long)]
        validate: bool,
        /// Blender executable to use instead of `$BLENDER` or `PATH` lookup
        #[clap(long)]
        blender_path: Option<PathBuf>,
        /// uv executable to use instead of `$UV` or `PATH` lookup
        #[clap(long)]
        uv_path: Option<PathBuf>,
    },
    /// Build the extension and (re)install it into a local development
    /// repository of a freshly started Blender.
    Run {
        path: Option<PathBuf>,
        /// Release profile to bake into the archive as `init_settings.toml`
        #[clap(long)]
        profile: Option<String>,
        /// Open this `.blend` file once the extension is installed
        #[clap(long)]
        blend: Option<PathBuf>,
        /// Start Blender without a user interface
        #[clap(long)]
        headless: bool,
        /// Blender executable to use instead of `$BLENDER` or `PATH` lookup
        #[clap(long)]
        blender_path: Option<PathBuf>,
        /// uv executable to use instead of `$UV` or `PATH` lookup
        #[clap(long)]
        uv_path: Option<PathBuf>,
    },
    /// Parse the project, resolve all wheels and report the archive grid
    /// without building anything.
    Check {
        path: Option<PathBuf>,
    },
    /// Print the `blender_manifest.toml` of every archive cell.
    ShowManifest {
        path: Option<PathBuf>,
        #[clap(long, value_enum, default_value = "toml")]
        format: ManifestFormat,
    },
    /// Print the wheels vendored into every archive cell.
    ShowDeps {
        path: Option<PathBuf>,
    },
    /// Rewrite `pyproject.toml` so each targeted Blender version's vendored
    /// packages become mutually exclusive extras, then refresh the lockfile.
    Sync {
        path: Option<PathBuf>,
        /// uv executable to use instead of `$UV` or `PATH` lookup
        #[clap(long)]
        uv_path: Option<PathBuf>,
    },
}

/// `path` may be a descriptor file or a directory holding `pyproject.toml`.
fn resolve_descriptor_path(path: Option<PathBuf>) -> PathBuf {
    let path = path.unwrap_or_else(|| PathBuf::from("."));
    if path.is_dir() {
        path.join("pyproject.toml")
    } else {
        path
    }
}

fn load_spec(path: Option<PathBuf>, profile: Option<&str>) -> anyhow::Result<BLExtSpec> {
    let path_descriptor = resolve_descriptor_path(path);
    BLExtSpec::from_descriptor_path(&path_descriptor, profile)
}

/// Load the spec, generating the lockfile first if this is the project's
/// first build.
fn load_spec_generating_lockfile(
    path: Option<PathBuf>,
    profile: Option<&str>,
    path_uv: Option<&Path>,
) -> anyhow::Result<BLExtSpec> {
    let path_descriptor = resolve_descriptor_path(path);
    let path_lockfile = conventional_lockfile_path(&path_descriptor);
    match BLExtSpec::from_descriptor_path(&path_descriptor, profile) {
        Ok(spec) => Ok(spec),
        Err(_) if !path_lockfile.is_file() => {
            ensure_lockfile(&path_lockfile, path_uv)?;
            BLExtSpec::from_descriptor_path(&path_descriptor, profile)
        }
        Err(err) => Err(err),
    }
}

/// `uv.lock` next to a `pyproject.toml`, `<script>.py.lock` next to a script.
fn conventional_lockfile_path(path_descriptor: &Path) -> PathBuf {
    let filename = path_descriptor
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    if filename.ends_with(".py") {
        path_descriptor.with_file_name(format!("{}.lock", filename))
    } else {
        path_descriptor.with_file_name("uv.lock")
    }
}

fn fetch_missing_wheels(plan: &BuildPlan, caches: &CachePaths) -> anyhow::Result<()> {
    let missing = plan.missing_wheels(&caches.wheel_cache)?;
    if missing.is_empty() {
        debug!("All required wheels are cached");
        return Ok(());
    }

    info!("Downloading {} wheel(s)", missing.len());
    let pb = ProgressBar::new(missing.len() as u64).with_style(
        ProgressStyle::default_bar()
            .template("Downloading {bar} {pos:>3}/{len:3} {wide_msg}")
            .expect("progress template is well-formed"),
    );
    let current: Mutex<Vec<String>> = Mutex::new(Vec::new());
    let abort = AtomicBool::new(false);
    download_wheels(
        &missing,
        &caches.wheel_cache,
        &abort,
        |wheel, _| {
            let mut current = current.lock().unwrap();
            if let Ok(filename) = wheel.filename() {
                current.push(filename.to_string());
            }
            pb.set_message(current.join(", "));
        },
        |_, _, _| {},
        |wheel, _| {
            let mut current = current.lock().unwrap();
            if let Ok(filename) = wheel.filename() {
                current.retain(|name| name.as_str() != filename);
            }
            pb.set_message(current.join(", "));
            pb.inc(1);
        },
    )?;
    pb.finish_and_clear();
    Ok(())
}

/// Fetch missing wheels, then pre-pack and pack every archive cell. Returns
/// the built archive paths in cell order.
fn build_archives(
    spec: &BLExtSpec,
    plan: &BuildPlan,
    caches: &CachePaths,
    overwrite: bool,
) -> anyhow::Result<Vec<PathBuf>> {
    fetch_missing_wheels(plan, caches)?;

    let mut built = Vec::new();
    for (version_idx, set_idx) in plan.cells() {
        let stem = spec.archive_stem(plan, version_idx, set_idx);
        let path_prepack = caches.prepack_cache.join(format!("{}.zip", stem));
        let path_zip = caches.build_cache.join(format!("{}.zip", stem));

        let file_map = plan.prepack_file_map(&caches.wheel_cache, version_idx, set_idx)?;
        pack::prepack_extension(
            &file_map,
            &path_prepack,
            |path, _| debug!("Pre-packing {}", path.display()),
            |_, _| {},
        )?;

        let manifest = spec.manifest_for_cell(plan, version_idx, set_idx);
        manifest.validate()?;
        let init_settings = spec
            .release_profile
            .as_ref()
            .map(|release_profile| release_profile.export_init_settings())
            .transpose()?;
        pack::pack_extension(
            spec.manifest_filename(),
            &manifest.to_toml()?,
            init_settings
                .as_deref()
                .map(|toml| (profiles::INIT_SETTINGS_FILENAME, toml)),
            &spec.source,
            &path_prepack,
            &path_zip,
            overwrite,
        )?;
        info!("Built {}", path_zip.display());
        built.push(path_zip);
    }
    Ok(built)
}

pub fn run_cli(cli: Cli) -> anyhow::Result<()> {
    match cli {
        Cli::Build {
            path,
            profile,
            overwrite,
            validate,
            blender_path,
            uv_path,
        } => {
            let spec =
                load_spec_generating_lockfile(path, profile.as_deref(), uv_path.as_deref())?;
            let plan = spec.build_plan()?;
            let caches = CachePaths::new(&spec.path_descriptor)?;
            let built = build_archives(&spec, &plan, &caches, overwrite)?;

            if validate {
                let path_blender = find_blender_exe(blender_path.as_deref())?;
                for path_zip in &built {
                    validate_extension(&path_blender, path_zip)?;
                    info!("Validated {}", path_zip.display());
                }
            }
            Ok(())
        }
        Cli::Run {
            path,
            profile,
            blend,
            headless,
            blender_path,
            uv_path,
        } => {
            let spec =
                load_spec_generating_lockfile(path, profile.as_deref(), uv_path.as_deref())?;
            let plan = spec.build_plan()?;
            let caches = CachePaths::new(&spec.path_descriptor)?;
            // A dev loop always wants the freshest archive.
            let built = build_archives(&spec, &plan, &caches, true)?;
            let path_zip = built.first().context("No archive cell was built")?;
            if built.len() > 1 {
                info!("{} archives were built; installing {}", built.len(), path_zip.display());
            }

            let path_blender = find_blender_exe(blender_path.as_deref())?;
            let path_local_repo = caches.build_cache.join("dev_repo");
            run_extension(
                &path_blender,
                path_zip,
                &spec.id,
                &path_local_repo,
                blend.as_deref(),
                headless,
            )
        }
        Cli::Check { path } => {
            let spec = load_spec(path, None)?;
            let plan = spec.build_plan()?;
            info!(
                "{} v{}: {} Blender version chunk(s) x {} platform chunk(s), {} wheel(s)",
                spec.id,
                spec.version,
                plan.bl_versions.len(),
                plan.platform_sets.len(),
                plan.required_wheels().len(),
            );
            for (version_idx, set_idx) in plan.cells() {
                info!(
                    "  {}.zip ({} wheels)",
                    spec.archive_stem(&plan, version_idx, set_idx),
                    plan.wheels_for_cell(version_idx, set_idx).len(),
                );
            }
            Ok(())
        }
        Cli::ShowManifest { path, format } => {
            let spec = load_spec(path, None)?;
            let plan = spec.build_plan()?;
            for (version_idx, set_idx) in plan.cells() {
                let manifest = spec.manifest_for_cell(&plan, version_idx, set_idx);
                println!("# {}", spec.archive_stem(&plan, version_idx, set_idx));
                match format {
                    ManifestFormat::Toml => println!("{}", manifest.to_toml()?),
                    ManifestFormat::Json => println!("{}", manifest.to_json()?),
                }
            }
            Ok(())
        }
        Cli::ShowDeps { path } => {
            let spec = load_spec(path, None)?;
            let plan = spec.build_plan()?;
            for (version_idx, set_idx) in plan.cells() {
                println!("# {}", spec.archive_stem(&plan, version_idx, set_idx));
                for filename in plan.wheel_filenames_for_cell(version_idx, set_idx) {
                    println!("wheels/{}", filename);
                }
            }
            Ok(())
        }
        Cli::Sync { path, uv_path } => {
            let path_descriptor = resolve_descriptor_path(path);
            ensure_lockfile(&conventional_lockfile_path(&path_descriptor), uv_path.as_deref())?;
            let spec = BLExtSpec::from_descriptor_path(&path_descriptor, None)?;
            let changed = rewrite_vendored_extras(&spec)
                .context("Failed to rewrite the vendored-extras span")?;
            if changed {
                info!("Updated {}, refreshing the lockfile", spec.path_descriptor.display());
                update_lockfile(&spec.path_lockfile, uv_path.as_deref())?;
            } else {
                info!("{} is already in sync", spec.path_descriptor.display());
            }
            Ok(())
        }
    }
}
