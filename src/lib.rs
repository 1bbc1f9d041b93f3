//! Builds installable Blender extension archives from a project descriptor
//! and its lockfile, vendoring all third-party Python wheels.

pub use crate::graph::DepGraph;
pub use crate::manifest::BLManifest;
pub use crate::releases::{BLReleaseOfficial, BLVersion};
pub use crate::spec::{BLExtSpec, BuildPlan};
pub use cli::{run_cli, Cli};

pub mod blender;
mod cli;
pub mod download;
pub mod graph;
mod inline_metadata;
pub mod lockfile;
pub mod manifest;
pub mod markers;
pub mod pack;
pub mod paths;
pub mod profiles;
pub mod releases;
pub mod resolve;
pub mod spec;
pub mod uv;
