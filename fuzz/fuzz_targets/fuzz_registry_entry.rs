//! Fuzz target for registry sidecar and index JSON.

#![no_main]

use libfuzzer_sys::fuzz_target;
use mscore::store::RegistryEntry;

fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<Vec<RegistryEntry>>(data);
    if let Ok(entry) = serde_json::from_slice::<RegistryEntry>(data) {
        let _ = entry.artifact_path();
        let _ = entry.to_sidecar_json();
    }
});
