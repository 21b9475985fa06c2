//! `synth`: build the deployment template from the environment.

use std::path::Path;

use anyhow::{Context, Result};

use veda_features_lib::{FeaturesStack, StackSettings};

use crate::output::emit;

/// Render the synthesized template as JSON.
pub fn render_template(settings: &StackSettings, pretty: bool) -> Result<String> {
    let stack = FeaturesStack::build(settings).context("failed to synthesize the stack")?;
    stack
        .template
        .to_json_string(pretty)
        .context("failed to serialize the template")
}

/// Handle the synth subcommand.
pub fn handle_synth(output: Option<&Path>, pretty: bool) -> Result<()> {
    let settings = StackSettings::from_env().context("failed to load deployment settings")?;
    let json = render_template(&settings, pretty)?;
    emit(output, &json)
}
