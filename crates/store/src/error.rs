//! 공유 스토어 에러 타입

use trapline_core::error::{StorageError, TraplineError};

/// 공유 스토어 연산 에러
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// 연결 실패 / 연결 끊김
    #[error("store connection error: {0}")]
    Connection(String),

    /// 명령 또는 스크립트 실행 실패
    #[error("store command error: {0}")]
    Command(String),

    /// 스토어가 예상하지 못한 형식의 응답을 반환
    #[error("unexpected store response: {0}")]
    Protocol(String),

    /// 내부 락 오염 (in-process 백엔드)
    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// 재연결이나 재시도로 회복될 수 있는 에러인지 여부
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Command(_))
    }
}

impl From<StoreError> for TraplineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection(reason) => {
                TraplineError::Storage(StorageError::Connection(reason))
            }
            other => TraplineError::Storage(StorageError::Command(other.to_string())),
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_maps_to_storage_connection() {
        let err: TraplineError = StoreError::Connection("refused".to_owned()).into();
        assert!(matches!(
            err,
            TraplineError::Storage(StorageError::Connection(_))
        ));
    }

    #[test]
    fn poisoned_is_not_transient() {
        assert!(!StoreError::Poisoned.is_transient());
        assert!(StoreError::Command("BUSY".to_owned()).is_transient());
    }
}
