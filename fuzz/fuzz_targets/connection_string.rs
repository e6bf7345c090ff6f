#![no_main]

use libfuzzer_sys::fuzz_target;
use pgq_client::ConnectionConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = ConnectionConfig::from_connection_string(s) {
            // Anything accepted must convert and validate without panicking.
            let _ = config.to_pg_config();
            let _ = config.validate();
            let _ = format!("{config:?}");
        }
    }
});
