//! Release profiles: logging settings baked into an archive as
//! `init_settings.toml`, plus optional specification-field overrides.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const INIT_SETTINGS_FILENAME: &str = "init_settings.toml";

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Settings available to the extension from before `register()` is called.
///
/// Options are deliberately limited to logging configuration; extensions must
/// explicitly load `init_settings.toml` and apply the fields themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseProfile {
    pub use_log_file: bool,
    pub log_file_name: String,
    pub log_file_level: LogLevel,
    pub use_log_console: bool,
    pub log_console_level: LogLevel,
    /// Specification fields replaced after construction, keyed by field name.
    #[serde(default, skip_serializing)]
    pub overrides: BTreeMap<String, toml::Value>,
}

impl ReleaseProfile {
    /// The `init_settings.toml` contents for this profile.
    pub fn export_init_settings(&self) -> anyhow::Result<String> {
        Ok(toml::to_string(self)?)
    }
}

/// The standard profiles every project can select without defining anything.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StandardReleaseProfile {
    Test,
    Dev,
    Release,
    ReleaseDebug,
}

impl StandardReleaseProfile {
    pub const ALL: [StandardReleaseProfile; 4] = [
        StandardReleaseProfile::Test,
        StandardReleaseProfile::Dev,
        StandardReleaseProfile::Release,
        StandardReleaseProfile::ReleaseDebug,
    ];

    pub fn release_profile(self) -> ReleaseProfile {
        let log_file_name = "addon.log".to_string();
        match self {
            StandardReleaseProfile::Test
            | StandardReleaseProfile::Dev
            | StandardReleaseProfile::ReleaseDebug => ReleaseProfile {
                use_log_file: true,
                log_file_name,
                log_file_level: LogLevel::Debug,
                use_log_console: true,
                log_console_level: LogLevel::Info,
                overrides: BTreeMap::new(),
            },
            StandardReleaseProfile::Release => ReleaseProfile {
                use_log_file: false,
                log_file_name,
                log_file_level: LogLevel::Debug,
                use_log_console: true,
                log_console_level: LogLevel::Warning,
                overrides: BTreeMap::new(),
            },
        }
    }
}

impl fmt::Display for StandardReleaseProfile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            StandardReleaseProfile::Test => "test",
            StandardReleaseProfile::Dev => "dev",
            StandardReleaseProfile::Release => "release",
            StandardReleaseProfile::ReleaseDebug => "release-debug",
        })
    }
}

impl FromStr for StandardReleaseProfile {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test" => Ok(StandardReleaseProfile::Test),
            "dev" => Ok(StandardReleaseProfile::Dev),
            "release" => Ok(StandardReleaseProfile::Release),
            "release-debug" => Ok(StandardReleaseProfile::ReleaseDebug),
            _ => Err(()),
        }
    }
}
