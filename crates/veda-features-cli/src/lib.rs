//! VEDA features CLI library.
//!
//! Subcommand handlers for synthesizing the deployment template and
//! inspecting the settings it is built from.

pub mod commands;
pub mod output;
