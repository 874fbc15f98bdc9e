#![no_main]

use libfuzzer_sys::fuzz_target;
use veilsearch::utils::{glob_prefix, has_wildcard, is_stop_word, split_globs, split_words};

fuzz_target!(|data: &str| {
    // Terms must come out normalized whatever the input
    for word in split_words(data) {
        assert!(!word.is_empty());
        assert!(!is_stop_word(&word));
        assert_eq!(word, word.to_lowercase());
    }
    for glob in split_globs(data) {
        let prefix = glob_prefix(&glob);
        assert!(glob.starts_with(prefix));
        assert!(!has_wildcard(prefix));
    }
});
