// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Model management.
//!
//! Handles versioned filenames, loading with fallback and health probing,
//! hot-reload, and the leases that pin sessions during inference.

mod events;
mod identity;
mod loader;
mod probe;
mod reload;
pub(crate) mod session;
mod state;

pub use events::{EventBus, ModelEvent, ModelHealthChanged, ModelReloaded};
pub use identity::{ModelIdentity, SemVer};
pub use loader::{fallback_chain, scan_models, LoaderConfig, ModelLoader};
pub use probe::{probe, synthetic_inputs};
pub use reload::ReloadReport;
pub use session::{LoadedSession, ModelLease, ModelMetadata};
pub use state::LoadState;
