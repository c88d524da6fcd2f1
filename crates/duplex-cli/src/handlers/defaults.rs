//! Defaults command handler.

use anyhow::Result;
use duplex_core::DuplexSettings;

/// Print the built-in settings as pretty JSON, ready to edit and pass to
/// `duplex check` or `duplex simulate --config`.
pub fn execute() -> Result<()> {
    let json = serde_json::to_string_pretty(&DuplexSettings::with_defaults())?;
    println!("{json}");
    Ok(())
}
