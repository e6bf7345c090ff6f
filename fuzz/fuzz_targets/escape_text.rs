#![no_main]

use libfuzzer_sys::fuzz_target;
use pgq_client::{escape_double_quotes, escape_single_quotes};

fuzz_target!(|input: &str| {
    let single = escape_single_quotes(input);
    assert_eq!(single.replace("''", "'"), input);
    assert_eq!(single.matches('\'').count(), 2 * input.matches('\'').count());

    // Backslashes are not escaped, so only the quote count is reversible.
    let double = escape_double_quotes(input);
    assert_eq!(double.matches('"').count(), input.matches('"').count());
    assert_eq!(double.len(), input.len() + input.matches('"').count());
});
