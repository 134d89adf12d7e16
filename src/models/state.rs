// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-key load state.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// `Unloaded -> Loading -> {Healthy, Failed}`;
/// `Healthy -> Reloading -> {Healthy, Failed}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadState {
    #[default]
    Unloaded,
    Loading,
    Healthy,
    Failed,
    Reloading,
}

#[derive(Default)]
pub(crate) struct StateTable {
    states: DashMap<String, LoadState>,
}

impl StateTable {
    pub(crate) fn get(&self, key: &str) -> LoadState {
        self.states.get(key).map(|s| *s).unwrap_or_default()
    }

    /// Enter `Loading`, or `Reloading` while a session is serving.
    pub(crate) fn begin(&self, key: &str, serving: bool) {
        let next = if serving { LoadState::Reloading } else { LoadState::Loading };
        self.states.insert(key.to_string(), next);
    }

    /// Leave a load attempt. A failed reload that still has a serving session stays `Healthy`.
    pub(crate) fn finish(&self, key: &str, succeeded: bool, serving: bool) {
        let next = if succeeded || serving { LoadState::Healthy } else { LoadState::Failed };
        self.states.insert(key.to_string(), next);
    }

    pub(crate) fn reset(&self, key: &str) {
        self.states.remove(key);
    }

    pub(crate) fn clear(&self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let t = StateTable::default();
        assert_eq!(t.get("k"), LoadState::Unloaded);
        t.begin("k", false);
        assert_eq!(t.get("k"), LoadState::Loading);
        t.finish("k", false, false);
        assert_eq!(t.get("k"), LoadState::Failed);
        t.begin("k", true);
        assert_eq!(t.get("k"), LoadState::Reloading);
        t.finish("k", false, true);
        assert_eq!(t.get("k"), LoadState::Healthy);
        t.reset("k");
        assert_eq!(t.get("k"), LoadState::Unloaded);
    }
}
