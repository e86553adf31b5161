// External crates
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::instrument;

/// Optional TOML profile supplying defaults for command-line flags.
///
/// ```toml
/// project_id = "my-project"
/// filter = "severity>=WARNING"
/// process_up_time = "30m"
/// buffer_window = "5s"
/// endpoint = "https://logging.googleapis.com"
/// ```
///
/// Flags always win over profile values.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    /// Default for `-projectId`.
    pub project_id: Option<String>,
    /// Default for `-filter`.
    pub filter: Option<String>,
    /// Default for `-process-up-time`, in the same duration syntax.
    pub process_up_time: Option<String>,
    /// Default for `-buffer-window`.
    pub buffer_window: Option<String>,
    /// Default for `-endpoint`.
    pub endpoint: Option<String>,
}

impl Profile {
    /// Load and parse the profile file
    #[instrument(
        name = "profile_loader",
        target = "helpers::load_config",
        level = "trace",
        skip_all
    )]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        tracing::trace!(
            profile_path = %path_ref.display(),
            "Loading log-tail profile"
        );

        let profile_str = match fs::read_to_string(path_ref) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read profile");
                return Err(e)
                    .with_context(|| format!("failed to read profile at {}", path_ref.display()));
            }
        };
        let profile = Self::parse(&profile_str)
            .with_context(|| format!("failed to parse TOML from {}", path_ref.display()))?;

        tracing::trace!(profile_path = %path_ref.display(), "Profile loaded successfully");
        Ok(profile)
    }

    /// Parse profile contents.
    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}
