#![no_main]

use libfuzzer_sys::fuzz_target;
use mariadb_wire::client::ConnectionDescriptor;
use std::collections::BTreeMap;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(descriptor) = ConnectionDescriptor::resolve(raw, &BTreeMap::new()) {
        for endpoint in descriptor.hosts() {
            let _ = descriptor.config_for(endpoint);
        }
    }
});
