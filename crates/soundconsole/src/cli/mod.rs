//! CLI subcommands: pipeline daemons and diagnostics.

mod config_cmd;
mod led_cmd;
mod resolve;
mod run;
mod trigger_cmd;
mod wiring;

use std::collections::BTreeMap;
use std::path::Path;

use clap::Subcommand;
use serde::Serialize;

pub(super) use crate::RUNNING;
pub(super) use soundconsole_lib::ConsoleError;
pub(super) use soundconsole_lib::config::Config;
pub(super) use soundconsole_lib::error::Result;

const PADDING: usize = 2;

/// Compute alignment width for a command's key-value output.
/// Ensures at least PADDING spaces after the longest key in either level,
/// with top-level and indent values aligned to the same column.
pub(super) fn kv_width(top: &[&str], indent: &[&str]) -> usize {
    let top_max = top.iter().map(|k| k.len()).max().unwrap_or(0);
    let indent_max = indent.iter().map(|k| k.len()).max().unwrap_or(0);
    let top_need = if top.is_empty() { 0 } else { top_max + PADDING };
    // Indent keys lose 2 chars of inner width to the "  " prefix
    let indent_need = if indent.is_empty() {
        0
    } else {
        indent_max + PADDING + 2
    };
    top_need.max(indent_need)
}

pub(super) fn format_kv(key: &str, value: impl std::fmt::Display, w: usize) -> String {
    format!("{key:<width$}{value}", width = w)
}

pub(super) fn kv(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("{}", format_kv(key, value, w));
}

pub(super) fn kv_indent(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("  {key:<width$}{value}", width = w.saturating_sub(2));
}

/// Pretty-print a JSON document to stdout.
pub(super) fn print_json(value: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    println!("{text}");
    Ok(())
}

/// Load config from `custom_path` if given, else from the default location.
/// Parse problems are logged and defaults used.
pub(super) fn load_config(custom_path: Option<&Path>) -> Config {
    match custom_path {
        Some(path) => {
            let (config, warnings) = Config::load_from(path);
            for w in &warnings {
                log::warn!("{w}");
            }
            config
        }
        None => Config::load(),
    }
}

// ── JSON output structs ──

#[derive(Serialize)]
pub(super) struct ConfigOutput {
    pub config_file: Option<String>,
    pub config_file_exists: bool,
    pub problems: Vec<String>,
    pub settings: Config,
}

#[derive(Serialize)]
pub(super) struct ResolveOutput {
    pub button: u8,
    pub channel: Option<u8>,
    pub path: String,
    pub assigned: bool,
    pub fallback_reason: Option<String>,
}

#[derive(Serialize)]
pub(super) struct AssignmentsOutput {
    pub mappings_file: String,
    pub channels: Vec<ChannelAssignmentsJson>,
}

#[derive(Serialize)]
pub(super) struct ChannelAssignmentsJson {
    pub channel: u8,
    pub error: Option<String>,
    pub buttons: BTreeMap<u8, String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the whole pipeline in one process (serial, channels, playback, LED)
    Run,

    /// Run serial, channel selector and playback; LED events go to the bus socket
    Trigger,

    /// Run the LED daemon, reading events from the bus socket
    Led,

    /// Show which file a button would play
    Resolve {
        /// Button id (1-16)
        button: u8,
        /// Channel to resolve against (default: read the selector)
        #[arg(long)]
        channel: Option<u8>,
    },

    /// List button assignments per channel
    Assignments {
        /// Only this channel (default: all)
        #[arg(long)]
        channel: Option<u8>,
    },

    /// Show current configuration and validate it
    Config,
}

/// Warn if `--json` was passed to a command that doesn't support it.
fn warn_json_unsupported(cmd_name: &str) {
    log::warn!("--json is not supported for `{cmd_name}` (ignored)");
}

pub fn run(cmd: Command, json: bool, config_path: Option<&Path>) -> Result<()> {
    match cmd {
        Command::Run => {
            if json {
                warn_json_unsupported("run");
            }
            run::cmd_run(config_path)
        }
        Command::Trigger => {
            if json {
                warn_json_unsupported("trigger");
            }
            trigger_cmd::cmd_trigger(config_path)
        }
        Command::Led => {
            if json {
                warn_json_unsupported("led");
            }
            led_cmd::cmd_led(config_path)
        }
        Command::Resolve { button, channel } => {
            resolve::cmd_resolve(button, channel, json, config_path)
        }
        Command::Assignments { channel } => resolve::cmd_assignments(channel, json, config_path),
        Command::Config => config_cmd::cmd_config(json, config_path),
    }
}

#[cfg(test)]
mod format_tests {
    use super::*;

    #[test]
    fn kv_width_top_only() {
        let w = kv_width(&["Short:", "Longer key:"], &[]);
        // "Longer key:" = 11 + PADDING = 13
        assert_eq!(w, 13);
    }

    #[test]
    fn kv_width_indent_drives_width() {
        let w = kv_width(&["A:"], &["Very long indent key:"]);
        // "Very long indent key:" = 21 + PADDING + 2 = 25
        assert_eq!(w, 25);
    }

    #[test]
    fn kv_width_empty_both() {
        assert_eq!(kv_width(&[], &[]), 0);
    }

    #[test]
    fn values_align_across_levels() {
        let w = kv_width(&["Top:"], &["Indent:"]);
        let top = format_kv("Top:", "V", w);
        let indent = format!("  {:<width$}{}", "Indent:", "V", width = w - 2);
        assert_eq!(top.find('V'), indent.find('V'));
    }

    #[test]
    fn format_kv_basic() {
        assert_eq!(format_kv("Key:", "value", 10), "Key:      value");
    }

    #[test]
    fn format_kv_overlong_key() {
        assert_eq!(format_kv("ExactWidth:", "val", 10), "ExactWidth:val");
    }
}
