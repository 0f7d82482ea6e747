//! Fuzz target for basic_io stanza parsing.
//!
//! Tests that the parser handles arbitrary input without panicking, and
//! that serializing a successful parse reparses to the same stanzas.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(stanzas) = forge_mtn::basic_io::parse(data) {
        let text = forge_mtn::basic_io::serialize(&stanzas);
        let reparsed = forge_mtn::basic_io::parse(&text).expect("serialized stanzas must parse");
        assert_eq!(stanzas, reparsed);
    }
});
