use std::fmt;

use serde::{Deserialize, Serialize};

const MAX_LEN: usize = 32;
const MIN_LEN: usize = 3;

/// Cloud application name: lowercase alphanumerics and single dashes, 3 to 32 chars.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationName(String);

impl ApplicationName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ApplicationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives a platform-safe application name from a free-form agent name.
///
/// Falls back to `agent-<first 8 chars of fallback_id>` when too little survives
/// sanitizing.
pub fn derive_application_name(raw: &str, fallback_id: &str) -> ApplicationName {
    let mut slug = String::with_capacity(raw.len());
    for ch in raw.to_lowercase().chars() {
        let mapped = if ch.is_ascii_lowercase() || ch.is_ascii_digit() { ch } else { '-' };
        if mapped == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(mapped);
    }

    let trimmed = slug.trim_matches('-');
    let truncated: String = trimmed.chars().take(MAX_LEN).collect();

    if truncated.len() < MIN_LEN {
        let prefix: String = fallback_id.chars().take(8).collect();
        return ApplicationName(format!("agent-{prefix}"));
    }

    ApplicationName(truncated)
}
