// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pf-storage: the filesystem layer backing Pairflow's bubble lifecycle —
//! the file lock primitive, the envelope/transcript store, the state
//! store, the runtime session registry, and the archive/metrics
//! subsystems. No module here knows about lifecycle semantics; they only
//! provide the durable, concurrency-safe primitives the lifecycle crate
//! composes.

pub mod archive;
pub mod lock;
pub mod metrics;
pub mod registry;
pub mod state_store;
pub mod transcript;

pub use archive::{ArchiveEntry, ArchiveError, ArchiveStatus};
pub use lock::{with_lock, LockError, LockOptions};
pub use metrics::{EventType, MetricsError, MetricsEvent};
pub use registry::{RegistryError, RuntimeSession};
pub use state_store::{StateStoreError, WriteGuard};
pub use transcript::{DraftEnvelope, ReadOptions, TranscriptError};
