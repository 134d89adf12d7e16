//! Fuzz target for the dense model binary format.

#![no_main]

use libfuzzer_sys::fuzz_target;
use mscore::engine::DenseModel;
use std::path::Path;

fuzz_target!(|data: &[u8]| {
    if let Ok(model) = DenseModel::from_bytes(Path::new("fuzz.bin"), data) {
        let _ = DenseModel::from_bytes(Path::new("fuzz.bin"), &model.to_bytes());
    }
});
