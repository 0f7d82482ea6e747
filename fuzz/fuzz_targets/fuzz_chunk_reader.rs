//! Fuzz target for stdio response chunk parsing.
//!
//! Tests that the chunk reader handles arbitrary input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let cursor = Cursor::new(data);

    let mut reader = forge_mtn::stdio::ChunkReader::new(cursor);

    // Try to read up to 100 chunks (prevent infinite loops on crafted input)
    for _ in 0..100 {
        if reader.read_chunk().is_err() {
            break; // Error is expected for malformed input
        }
    }
});
