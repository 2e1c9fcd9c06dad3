//! Topic derivation, normalization and the topic → address index.
//!
//! ```text
//!  DeviceSpec ──address_for──► "kitchenlight"
//!      │
//!      └──topics_for──► ["stat/kitchen/POWER", "stat/kitchen/RESULT"] ──bind──► TopicIndex
//! ```

mod index;

pub use index::{RegistryError, TopicIndex};

use crate::devices::{DeviceSpec, DeviceType};

/// Host addressing allows at most this many characters.
pub const MAX_ADDRESS_LEN: usize = 14;

/// Leading placeholder replaced by the configured prefix.
pub const PLACEHOLDER: char = '~';

/// Derives the host node address for a device id.
///
/// Underscores and hyphens are dropped first, then anything outside the
/// host's `[a-z0-9]` alphabet, then the result is lowercased and truncated.
pub fn address_for(id: &str) -> String {
    id.chars()
        .filter(|c| *c != '_' && *c != '-')
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .take(MAX_ADDRESS_LEN)
        .collect()
}

/// Substitutes a leading placeholder with `prefix`.
///
/// Topics without the placeholder, or without a configured prefix, come back
/// unchanged. A missing topic normalizes to the empty string.
pub fn normalize(topic: Option<&str>, prefix: Option<&str>) -> String {
    let Some(topic) = topic else {
        return String::new();
    };
    match (topic.strip_prefix(PLACEHOLDER), prefix) {
        (Some(rest), Some(prefix)) if !prefix.is_empty() => format!("{prefix}{rest}"),
        _ => topic.to_string(),
    }
}

/// Everything before the last `/`, or the whole topic when there is none.
pub fn base_path(topic: &str) -> &str {
    topic.rsplit_once('/').map_or(topic, |(base, _)| base)
}

/// `stat/x/POWER` + `RESULT` → `stat/x/RESULT`.
pub fn sibling(topic: &str, leaf: &str) -> String {
    format!("{}/{}", base_path(topic), leaf)
}

/// Rewrites telemetry paths to their status counterparts.
pub fn stat_path(topic: &str) -> String {
    topic.replace("tele/", "stat/")
}

/// Every topic a device listens on, normalized, in order and without duplicates.
pub fn topics_for(
    spec: &DeviceSpec,
    descriptor: &dyn DeviceType,
    status_prefix: Option<&str>,
) -> Vec<String> {
    let primary: Vec<String> = spec
        .status_topics()
        .iter()
        .map(|topic| normalize(Some(topic), status_prefix))
        .collect();

    let mut topics = descriptor.status_topics(&primary);
    if let Some(first) = primary.first() {
        topics.extend(descriptor.extra_topics(first));
    }

    let mut seen = std::collections::HashSet::new();
    topics.retain(|topic| !topic.is_empty() && seen.insert(topic.clone()));
    topics
}
