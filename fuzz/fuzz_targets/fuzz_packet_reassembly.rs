#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use mariadb_wire::protocol::packet::take_message;

#[derive(Debug)]
struct SegmentedInput {
    data: Vec<u8>,
    split_points: Vec<u8>,
}

impl<'a> Arbitrary<'a> for SegmentedInput {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        let data: Vec<u8> = u.arbitrary()?;
        let split_points: Vec<u8> = u.arbitrary()?;
        Ok(Self { data, split_points })
    }
}

fuzz_target!(|input: SegmentedInput| {
    if input.data.is_empty() {
        return;
    }

    let mut splits: Vec<usize> = input
        .split_points
        .iter()
        .map(|&b| (b as usize) % (input.data.len() + 1))
        .collect();
    splits.push(0);
    splits.push(input.data.len());
    splits.sort_unstable();
    splits.dedup();

    // Packets arrive split at arbitrary TCP segment boundaries
    let mut buf = BytesMut::new();
    let mut sequence = input.data[0];
    for window in splits.windows(2) {
        buf.extend_from_slice(&input.data[window[0]..window[1]]);
        loop {
            match take_message(&mut buf, &mut sequence) {
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
        }
    }
});
