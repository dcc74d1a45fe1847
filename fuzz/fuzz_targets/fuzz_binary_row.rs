#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use mariadb_wire::protocol::ColumnDefinition;
use mariadb_wire::Row;
use std::sync::Arc;

const TYPES: &[u8] = &[
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 15, 16, 245, 246, 247, 248, 249, 250, 251,
    252, 253, 254, 255,
];

fuzz_target!(|data: &[u8]| {
    // First byte: column count; next bytes: column types; rest: row payload
    let Some((&count, rest)) = data.split_first() else {
        return;
    };
    let count = usize::from(count % 16);
    if rest.len() < count {
        return;
    }
    let (types, payload) = rest.split_at(count);
    let columns: Arc<[ColumnDefinition]> = types
        .iter()
        .map(|&t| ColumnDefinition {
            column_type: TYPES[usize::from(t) % TYPES.len()],
            ..Default::default()
        })
        .collect();

    if let Ok(row) = Row::binary(Bytes::copy_from_slice(payload), Arc::clone(&columns)) {
        for i in 0..row.len() {
            let _ = row.raw(i);
        }
    }
    if let Ok(row) = Row::text(Bytes::copy_from_slice(payload), columns) {
        for i in 0..row.len() {
            let _ = row.raw(i);
        }
    }
});
