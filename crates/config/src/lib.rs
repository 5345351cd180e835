// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! `bubble.toml` parsing: a deliberately restricted TOML subset (§6). The
//! restriction is enforced on the raw text before handing it to the `toml`
//! crate, so the error surfaced to the caller names the offending line
//! instead of a generic parse failure downstream.

use pf_core::BubbleConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bubble.toml:{line}: {message}")]
    Restricted { line: usize, message: String },

    #[error("bubble.toml parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("bubble.toml serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("bubble.toml invalid: {0}")]
    Invalid(#[from] pf_core::PairflowError),
}

/// Rejects multiline strings (`"""`/`'''`), dotted keys (`a.b = `), and
/// array-of-tables (`[[...]]`) before delegating to `toml::from_str`.
fn enforce_restricted_subset(text: &str) -> Result<(), ConfigError> {
    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim_start();
        if line.starts_with('#') {
            continue;
        }
        if line.contains("\"\"\"") || line.contains("'''") {
            return Err(ConfigError::Restricted {
                line: line_no,
                message: "multiline strings are not permitted".into(),
            });
        }
        if line.starts_with("[[") {
            return Err(ConfigError::Restricted {
                line: line_no,
                message: "array-of-tables is not permitted".into(),
            });
        }
        if let Some((key, _)) = line.split_once('=') {
            let key = key.trim();
            let is_table_header = key.starts_with('[');
            if !is_table_header && !key.is_empty() && key.contains('.') {
                return Err(ConfigError::Restricted {
                    line: line_no,
                    message: format!("dotted key `{key}` is not permitted"),
                });
            }
        }
    }
    Ok(())
}

pub fn parse_bubble_toml(text: &str) -> Result<BubbleConfig, ConfigError> {
    enforce_restricted_subset(text)?;
    let config: BubbleConfig = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
}

pub fn serialize_bubble_toml(config: &BubbleConfig) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(config)?)
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
