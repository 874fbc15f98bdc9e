#![no_main]

use libfuzzer_sys::fuzz_target;
use veilsearch::store::NodeRef;
use veilsearch::store::codec::{decode_node, encode_node};

fuzz_target!(|data: &[u8]| {
    // Arbitrary payloads either decode or fail cleanly; whatever decodes
    // must survive a second trip through the codec unchanged
    if let Ok(state) = decode_node(NodeRef(1), data) {
        let encoded = encode_node(&state);
        let again = decode_node(NodeRef(1), &encoded).expect("re-encoded node decodes");
        assert_eq!(state, again);
    }
});
