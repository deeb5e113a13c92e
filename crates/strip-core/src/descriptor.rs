//! Best-effort description lookup.
//!
//! A channel `NAME` may have a companion string channel `NAME<suffix>`
//! holding a human-readable description. The lookup is synchronous and
//! bounded; every failure degrades to an empty description.

use std::time::Duration;
use stripdaq_client::PubSubClient;
use tracing::{debug, trace};

/// Description lookup settings.
#[derive(Debug, Clone)]
pub struct DescriptorConfig {
    /// Suffix appended to the channel name.
    pub suffix: String,
    /// Bound for each of the resolve and read steps.
    pub timeout: Duration,
    /// Maximum length of the companion name.
    pub max_name_len: usize,
    /// Maximum length of the returned description.
    pub max_len: usize,
}

/// Build the companion description name for `name`.
///
/// Returns `None` if the result would exceed `max_name_len`.
#[must_use]
pub fn description_name(name: &str, suffix: &str, max_name_len: usize) -> Option<String> {
    let full = format!("{name}{suffix}");
    (full.len() <= max_name_len).then_some(full)
}

/// Fetch the description of `name`.
///
/// Never fails: returns an empty string when the companion channel can not
/// be resolved or read in time.
pub fn fetch_description<C: PubSubClient>(
    client: &mut C,
    name: &str,
    config: &DescriptorConfig,
) -> String {
    let Some(desc_name) = description_name(name, &config.suffix, config.max_name_len) else {
        debug!(channel = %name, "Description name too long");
        return String::new();
    };

    let handle = match client.resolve(&desc_name, config.timeout) {
        Ok(handle) => handle,
        Err(e) => {
            debug!(channel = %desc_name, status = %e, "Description lookup failed");
            return String::new();
        }
    };

    let text = client.read_string(handle, config.timeout);
    if let Err(e) = client.release(handle) {
        trace!(channel = %desc_name, status = %e, "Description channel release failed");
    }

    match text {
        Ok(text) => clean(&text, config.max_len),
        Err(e) => {
            debug!(channel = %desc_name, status = %e, "Description read failed");
            String::new()
        }
    }
}

fn clean(text: &str, max_len: usize) -> String {
    let text = text.trim_end_matches('\0').trim_end();
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
