//! 에러 타입: 도메인별 에러 정의

/// Trapline 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum TraplineError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인(모듈 생명주기) 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 파싱 에러
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// 공유 스토어 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 로드 / 검증 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 이미 실행 중
    #[error("already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("not running")]
    NotRunning,

    /// 시작 준비 실패 (규칙 로드, 스토어 등록, 클라이언트 생성 등)
    #[error("pipeline init failed: {0}")]
    InitFailed(String),
}

/// 파싱 에러
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// 큐 항목이 JSON 객체 엔벨로프가 아님
    #[error("invalid envelope: {0}")]
    Envelope(String),

    /// 엔벨로프 크기 초과
    #[error("envelope too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}

/// 공유 스토어 에러 (`trapline-store`의 `StoreError`가 변환되어 들어옴)
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 스토어에 연결할 수 없음
    #[error("store unreachable: {0}")]
    Connection(String),

    /// 원자 연산 실패 또는 예상하지 못한 응답
    #[error("store command failed: {0}")]
    Command(String),
}
