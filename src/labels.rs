// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Label validation and merging.
//!
//! Labels are key/value metadata attached to a session. Keys are lowercase
//! snake_case, values are bounded strings, and a session holds at most
//! [`MAX_LABELS`] user entries. Keys under the reserved `aiobs_` prefix belong
//! to the SDK: they are set from system facts at session start and can never
//! be set or removed by callers.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::error::LabelError;

/// Prefix reserved for SDK-managed labels.
pub const RESERVED_PREFIX: &str = "aiobs_";

/// Environment variables under this prefix become labels.
pub const ENV_LABEL_PREFIX: &str = "AIOBS_LABEL_";

/// Maximum label key length.
pub const MAX_KEY_LEN: usize = 63;

/// Maximum label value length.
pub const MAX_VALUE_LEN: usize = 256;

/// Maximum number of user labels per session.
pub const MAX_LABELS: usize = 64;

static KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,62}$").expect("label key pattern is valid"));

/// Validate a user-supplied label key.
pub fn validate_key(key: &str) -> Result<(), LabelError> {
    if !KEY_PATTERN.is_match(key) {
        return Err(LabelError::InvalidKey(key.to_string()));
    }
    if key.starts_with(RESERVED_PREFIX) {
        return Err(LabelError::ReservedKey(key.to_string()));
    }
    Ok(())
}

/// Validate a label value against the length cap.
pub fn validate_value(value: &str, key: &str) -> Result<(), LabelError> {
    let len = value.chars().count();
    if len > MAX_VALUE_LEN {
        return Err(LabelError::ValueTooLong {
            key: key.to_string(),
            len,
            max: MAX_VALUE_LEN,
        });
    }
    Ok(())
}

/// Validate a whole label map: entry count first, then each pair.
pub fn validate_labels(labels: &BTreeMap<String, String>) -> Result<(), LabelError> {
    if labels.len() > MAX_LABELS {
        return Err(LabelError::TooMany {
            count: labels.len(),
            max: MAX_LABELS,
        });
    }
    for (key, value) in labels {
        validate_key(key)?;
        validate_value(value, key)?;
    }
    Ok(())
}

/// Validate the user-entry count of a merged label map.
///
/// Reserved-prefixed entries are exempt; everything else, including labels
/// folded in from the environment, counts against [`MAX_LABELS`].
pub fn validate_user_count(labels: &BTreeMap<String, String>) -> Result<(), LabelError> {
    let count = labels
        .keys()
        .filter(|k| !k.starts_with(RESERVED_PREFIX))
        .count();
    if count > MAX_LABELS {
        return Err(LabelError::TooMany {
            count,
            max: MAX_LABELS,
        });
    }
    Ok(())
}

/// SDK-managed labels computed once per session.
///
/// Reserved-prefixed and exempt from the user-label cap.
pub fn system_labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        format!("{}sdk_version", RESERVED_PREFIX),
        crate::VERSION.to_string(),
    );
    labels.insert(
        format!("{}runtime_version", RESERVED_PREFIX),
        format!("rust-{}", env!("CARGO_PKG_RUST_VERSION")),
    );
    labels.insert(format!("{}hostname", RESERVED_PREFIX), hostname());
    labels.insert(
        format!("{}os", RESERVED_PREFIX),
        std::env::consts::OS.to_string(),
    );
    labels
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| String::from("unknown"))
}

/// Labels derived from `AIOBS_LABEL_*` environment variables.
///
/// The variable suffix is case-folded to lowercase and truncated to the key
/// limit; values are truncated to the value limit. Suffixes that still do not
/// form a valid key are skipped with a warning.
pub fn environment_labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    for (name, value) in std::env::vars() {
        let Some(suffix) = name.strip_prefix(ENV_LABEL_PREFIX) else {
            continue;
        };
        let key: String = suffix.to_lowercase().chars().take(MAX_KEY_LEN).collect();
        if validate_key(&key).is_err() {
            warn!(var = %name, "Skipping environment label with invalid key");
            continue;
        }
        let value: String = value.chars().take(MAX_VALUE_LEN).collect();
        labels.insert(key, value);
    }
    labels
}

/// Merge label layers with right-biased overwrite: system, then environment,
/// then explicit labels win on key collision.
pub fn merged_labels(explicit: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut merged = system_labels();
    merged.extend(environment_labels());
    merged.extend(explicit.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
