#![no_main]

use libfuzzer_sys::fuzz_target;
use warden_snapshot::compress::compress_to_budget;

fuzz_target!(|data: (String, u16)| {
    let (text, raw_budget) = data;
    let budget = (raw_budget as usize).max(400);

    let (compressed, audit) = compress_to_budget(&text, budget);

    // Invariant: output plus trailer fits the budget with slack for the
    // reserved audit line.
    let total = compressed.chars().count() + audit.trailer(budget).chars().count();
    assert!(total <= budget + 256, "total {total} for budget {budget}");
});
