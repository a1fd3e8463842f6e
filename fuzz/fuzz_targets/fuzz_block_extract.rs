#![no_main]

use libfuzzer_sys::fuzz_target;
use raro::fuzz_api::{BlockType, extract_blocks, extract_delegation, parse_function_calls};

fuzz_target!(|data: &str| {
    for kind in [BlockType::Function, BlockType::Delegation] {
        for block in extract_blocks(data, kind) {
            assert_eq!(block.block_type, kind);
        }
    }
    let _ = parse_function_calls(data);
    let _ = extract_delegation(data, None);
});
