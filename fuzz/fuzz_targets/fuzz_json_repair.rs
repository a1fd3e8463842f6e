#![no_main]

use libfuzzer_sys::fuzz_target;
use raro::fuzz_api::repair_json;

fuzz_target!(|data: &str| {
    if let Some(outcome) = repair_json(data, "fuzz") {
        // whatever the repair produced must be valid JSON again
        let rendered = serde_json::to_string(&outcome.value).unwrap();
        assert!(serde_json::from_str::<serde_json::Value>(&rendered).is_ok());
    }
});
