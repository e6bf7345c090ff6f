#![no_main]

use libfuzzer_sys::fuzz_target;
use pgq_client::result::command_tag;

fuzz_target!(|sql: &str| {
    let tag = command_tag(sql);
    assert!(!tag.chars().any(char::is_lowercase));
    assert!(!tag.chars().any(char::is_whitespace));
});
