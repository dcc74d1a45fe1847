#![no_main]

use libfuzzer_sys::fuzz_target;
use mariadb_wire::protocol::decode::{
    classify_response, decode_auth_switch, decode_column_definition, decode_handshake,
    decode_prepare_ok,
};

fuzz_target!(|data: &[u8]| {
    // Every decoder must reject malformed payloads without panicking
    let _ = decode_handshake(data);
    let _ = classify_response(data);
    let _ = decode_column_definition(data);
    let _ = decode_auth_switch(data);
    let _ = decode_prepare_ok(data);
});
