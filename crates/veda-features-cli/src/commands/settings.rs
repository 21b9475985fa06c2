//! `settings`: print the resolved deployment settings.

use anyhow::{Context, Result};

use veda_features_lib::StackSettings;

use crate::output::emit;

/// Handle the settings subcommand.
///
/// Settings hold secret ARNs and names only, never secret values.
pub fn handle_settings() -> Result<()> {
    let settings = StackSettings::from_env().context("failed to load deployment settings")?;
    let json = serde_json::to_string_pretty(&settings).context("failed to serialize settings")?;
    emit(None, &json)
}
