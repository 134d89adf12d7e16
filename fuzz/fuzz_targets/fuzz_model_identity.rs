//! Fuzz target for versioned model filename parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use mscore::models::ModelIdentity;

fuzz_target!(|data: &[u8]| {
    if let Ok(name) = std::str::from_utf8(data) {
        if let Some(identity) = ModelIdentity::parse(name) {
            let _ = identity.cache_key();
            let _ = identity.version_cmp(&identity);
        }
    }
});
