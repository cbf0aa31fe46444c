use crate::error::ConfigError;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Configuration for mounting a package.
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// fs_name = "assets"
/// attr_ttl_secs = 30
/// allow_other = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MountConfig {
    /// Filesystem name shown in the mount table.
    pub fs_name: String,
    /// Filesystem subtype (`fuse.<subtype>`).
    pub subtype: String,
    /// How long the kernel may cache attributes and lookups, in seconds.
    pub attr_ttl_secs: u64,
    /// Let users other than the mounting user access the mount.
    pub allow_other: bool,
    /// Unmount automatically when the process exits.
    pub auto_unmount: bool,
    /// Worker threads for the read runtime (tokio default when unset).
    pub worker_threads: Option<usize>,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            fs_name: "jpakfs".to_string(),
            subtype: "jpak".to_string(),
            attr_ttl_secs: 1,
            allow_other: false,
            auto_unmount: false,
            worker_threads: None,
        }
    }
}

impl MountConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration from a TOML file.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Attribute cache lifetime handed to the kernel.
    pub fn attr_ttl(&self) -> Duration {
        Duration::from_secs(self.attr_ttl_secs)
    }

    /// FUSE mount options for this configuration. Always read-only.
    #[cfg(feature = "fuse")]
    pub fn mount_options(&self) -> Vec<fuser::MountOption> {
        use fuser::MountOption;

        let mut options = vec![
            MountOption::RO,
            MountOption::FSName(self.fs_name.clone()),
            MountOption::Subtype(self.subtype.clone()),
            MountOption::DefaultPermissions,
        ];
        if self.allow_other {
            options.push(MountOption::AllowOther);
        }
        if self.auto_unmount {
            options.push(MountOption::AutoUnmount);
        }
        options
    }
}
