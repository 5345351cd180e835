// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed identifiers.
//!
//! Every id in Pairflow is a distinct newtype over `String` so that, say, an
//! `IntentId` can never be passed where a `BubbleId` is expected. `ShortId`
//! is implemented by the `define_id!` macro below.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Marker trait implemented by every id type defined with `define_id!`.
pub trait ShortId: fmt::Display + Clone + PartialEq + Eq {
    fn as_str(&self) -> &str;
}

#[macro_export]
macro_rules! define_id {
    ($(#[$meta:meta])* pub struct $name:ident;) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }
        }

        impl $crate::id::ShortId for $name {
            fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id! {
    /// Human-chosen bubble identifier, matches `^[a-z][a-z0-9_-]{2,63}$`.
    pub struct BubbleId;
}

define_id! {
    /// Opaque, collision-resistant instance identifier for a bubble.
    pub struct BubbleInstanceId;
}

define_id! {
    /// Protocol envelope id, `msg_<YYYYMMDD>_<N>`.
    pub struct EnvelopeId;
}

define_id! {
    /// Rework intent id, unique within a bubble across pending + history.
    pub struct IntentId;
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
