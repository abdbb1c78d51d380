//! `resolve` and `assignments` subcommands: query the mappings file the
//! same way a button press does.

use std::collections::BTreeMap;
use std::path::Path;

use soundconsole_lib::channel::ChannelState;
use soundconsole_lib::protocol::{self, MAX_CHANNELS};
use soundconsole_lib::resolver::ResolutionSource;
use soundconsole_lib::store::AssignmentStore;

use super::wiring;
use super::{
    AssignmentsOutput, ChannelAssignmentsJson, ConsoleError, ResolveOutput, Result, kv, kv_indent,
    kv_width, print_json,
};

fn check_channel(channel: Option<u8>) -> Result<()> {
    match channel {
        Some(c) if !protocol::is_valid_channel(c) => Err(ConsoleError::Config(format!(
            "channel must be 1-{MAX_CHANNELS}, got {c}"
        ))),
        _ => Ok(()),
    }
}

pub(super) fn cmd_resolve(
    button: u8,
    channel: Option<u8>,
    json: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    if !protocol::is_valid_button(button) {
        return Err(ConsoleError::Config(format!(
            "button must be {}-{}, got {button}",
            protocol::MIN_BUTTON_ID,
            protocol::MAX_BUTTON_ID
        )));
    }
    check_channel(channel)?;

    let config = super::load_config(config_path);
    let channel = channel.or_else(|| wiring::sample_channel(&config));
    let resolver = wiring::resolver(&config, ChannelState::new(channel));
    let resolution = resolver.resolve_on(channel, button);

    let fallback_reason = match resolution.source {
        ResolutionSource::Assigned => None,
        ResolutionSource::Fallback(reason) => Some(reason),
    };

    if json {
        return print_json(&ResolveOutput {
            button,
            channel: resolution.channel,
            path: resolution.path.display().to_string(),
            assigned: fallback_reason.is_none(),
            fallback_reason: fallback_reason.map(|r| r.to_string()),
        });
    }

    let w = kv_width(&["Button:", "Channel:", "File:", "Source:"], &[]);
    kv("Button:", button, w);
    match resolution.channel {
        Some(c) => kv("Channel:", c, w),
        None => kv("Channel:", "(none)", w),
    }
    kv("File:", resolution.path.display(), w);
    match fallback_reason {
        None => kv("Source:", "assigned", w),
        Some(reason) => kv("Source:", format_args!("fallback ({reason})"), w),
    }
    Ok(())
}

pub(super) fn cmd_assignments(
    channel: Option<u8>,
    json: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    check_channel(channel)?;

    let config = super::load_config(config_path);
    let resolver = wiring::resolver(&config, ChannelState::new(None));
    let store = resolver.store();

    let channels: Vec<u8> = match channel {
        Some(c) => vec![c],
        None => (1..=MAX_CHANNELS).collect(),
    };

    let listing: Vec<ChannelAssignmentsJson> = channels
        .into_iter()
        .map(|c| match store.current_channel_assignments(c) {
            Ok(map) => ChannelAssignmentsJson {
                channel: c,
                error: None,
                buttons: map
                    .into_iter()
                    .map(|(b, p)| (b, p.display().to_string()))
                    .collect(),
            },
            Err(e) => ChannelAssignmentsJson {
                channel: c,
                error: Some(e.to_string()),
                buttons: BTreeMap::new(),
            },
        })
        .collect();

    if json {
        return print_json(&AssignmentsOutput {
            mappings_file: store.path().display().to_string(),
            channels: listing,
        });
    }

    let w = kv_width(&["Mappings:"], &["Button 16:"]);
    kv("Mappings:", store.path().display(), w);
    for entry in &listing {
        println!();
        println!("Channel {}:", entry.channel);
        if let Some(e) = &entry.error {
            kv_indent("error:", e, w);
        } else if entry.buttons.is_empty() {
            println!("  (no assignments)");
        } else {
            for (button, path) in &entry.buttons {
                kv_indent(&format!("Button {button}:"), path, w);
            }
        }
    }
    Ok(())
}
