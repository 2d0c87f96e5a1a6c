#![no_main]

use libfuzzer_sys::fuzz_target;
use warden_transcript::parse_transcript_str;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    // The parser must tolerate any byte soup: malformed lines are skipped,
    // never panicked on.
    let _ = parse_transcript_str(text);
});
