// One module per subcommand; main.rs only parses and dispatches.

pub mod domain;
pub mod settings;
pub mod synth;
