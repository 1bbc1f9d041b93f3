//! Blender platforms and Python wheel compatibility.
//!
//! Blender extensions vendor their Python dependencies as wheels, one set per
//! supported platform. This crate knows the closed set of platforms Blender
//! runs on, parses wheel filenames, and answers whether a given wheel can run
//! on a given platform under interpreter/ABI/OS-version constraints.

pub use platform::{BLPlatform, BLPlatformSet};
use std::io;
use thiserror::Error;
pub use wheel::{normalize_name, Wheel, WheelFilename};

mod platform;
mod wheel;

#[derive(Error, Debug)]
pub enum WheelCompatError {
    #[error(transparent)]
    IOError(#[from] io::Error),
    /// Doesn't follow the wheel file name schema
    #[error("The wheel filename \"{0}\" is invalid: {1}")]
    InvalidWheelFileName(String, String),
    /// The wheel URL must end in a `<...>.whl` path segment
    #[error("No wheel filename could be derived from the URL \"{0}\"")]
    NoFilenameInUrl(String),
    #[error("\"{0}\" is not a platform supported by Blender")]
    UnknownPlatform(String),
    /// A platform set must name at least one platform
    #[error("A platform set must contain at least one platform")]
    EmptyPlatformSet,
}
