#![no_main]

use libfuzzer_sys::fuzz_target;
use trapline_core::envelope::Envelope;
use trapline_matcher::Event;

fuzz_target!(|data: &[u8]| {
    if let Ok(raw) = std::str::from_utf8(data) {
        if let Ok(env) = Envelope::decode(raw) {
            // 잘못된 페이로드는 Err로 끝나야 하며 패닉하면 안 됨
            let _ = Event::from_envelope(&env);
        }
    }
});
