#![no_main]

use libfuzzer_sys::fuzz_target;
use trapline_core::envelope::{DeadLetterRecord, Envelope};

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    // 디코딩된 엔벨로프는 다시 인코딩할 수 있어야 함
    if let Ok(env) = Envelope::decode(raw) {
        let encoded = env.encode().expect("decoded envelope must encode");
        let again = Envelope::decode(&encoded).expect("encoded envelope must decode");
        assert_eq!(env.retry_count, again.retry_count);
    }

    let _ = DeadLetterRecord::decode(raw);
});
