//! 스토어 키 레이아웃
//!
//! 모든 백엔드가 같은 키 이름을 사용하므로, CLI와 데몬이 같은 스토어를 들여다볼 수 있습니다.

/// 워커별 처리 중(lease) 리스트: `{queue}:processing:{worker_id}`
pub fn processing(queue: &str, worker_id: &str) -> String {
    format!("{queue}:processing:{worker_id}")
}

/// 큐별 워커 레지스트리 집합: `{queue}:workers`
pub fn workers(queue: &str) -> String {
    format!("{queue}:workers")
}

/// 지연 가시성 정렬 집합: `{queue}:delayed`
pub fn delayed(queue: &str) -> String {
    format!("{queue}:delayed")
}

/// 워커 heartbeat: `trapline:heartbeat:{worker_id}`
pub fn heartbeat(worker_id: &str) -> String {
    format!("trapline:heartbeat:{worker_id}")
}

/// 슬라이딩 윈도우: `trapline:ratelimit:{key}`
pub fn rate_window(key: &str) -> String {
    format!("trapline:ratelimit:{key}")
}

/// 임계치 카운터: `trapline:threshold:{key}`
pub fn threshold(key: &str) -> String {
    format!("trapline:threshold:{key}")
}

/// 임계치 발동 플래그: `trapline:threshold:{key}:triggered`
pub fn threshold_triggered(key: &str) -> String {
    format!("trapline:threshold:{key}:triggered")
}

/// 서킷 상태 해시: `trapline:circuit:{key}`
pub fn circuit(key: &str) -> String {
    format!("trapline:circuit:{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        assert_eq!(
            processing("trapline:ingest", "w1"),
            "trapline:ingest:processing:w1"
        );
        assert_eq!(workers("q"), "q:workers");
        assert_eq!(delayed("q"), "q:delayed");
        assert_eq!(heartbeat("w1"), "trapline:heartbeat:w1");
        assert_eq!(
            threshold_triggered("unhandled:web-01"),
            "trapline:threshold:unhandled:web-01:triggered"
        );
    }
}
