//! Invocation configuration.
//!
//! Two layers live here:
//!
//! - [`Settings`]: declarative options loaded from a TOML file
//!   ([`load_settings`], [`load_settings_str`]).
//! - [`Configuration`]: the runtime bundle of collaborators an invocation
//!   is driven by (build provider, preparers, tests, listeners, log
//!   handles). Settings are applied onto it with
//!   [`Configuration::with_settings`].

pub mod configuration;
pub mod schema;

pub use configuration::Configuration;
pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads settings from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid TOML, or does
/// not match the settings schema.
///
/// # Example
///
/// ```no_run
/// use tradeflow::config::load_settings;
/// use std::path::Path;
///
/// let settings = load_settings(Path::new("tradeflow.toml"))?;
/// println!("Max parallel: {}", settings.scheduler.max_parallel);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_settings(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

    let settings: Settings = toml::from_str(&content)
        .with_context(|| format!("Failed to parse settings file: {}", path.display()))?;

    Ok(settings)
}

/// Loads settings from a TOML string.
///
/// # Example
///
/// ```
/// use tradeflow::config::load_settings_str;
///
/// let settings = load_settings_str(r#"
///     [invocation]
///     bugreport_on_invocation_ended = true
///
///     [scheduler]
///     max_parallel = 4
/// "#)?;
///
/// assert!(settings.invocation.bugreport_on_invocation_ended);
/// assert_eq!(settings.scheduler.max_parallel, 4);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_settings_str(content: &str) -> Result<Settings> {
    let settings: Settings = toml::from_str(content).context("Failed to parse settings")?;

    Ok(settings)
}
