//! CDC 관련 에러 타입

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CdcError {
    /// 핸드셰이크 실패 (재시도 대상)
    #[error("MySQL 연결 에러: {0}")]
    ConnectionError(String),

    /// 스트리밍 중 연결 끊김 (재시도 대상)
    #[error("전송 에러: {0}")]
    Transport(String),

    #[error("유효하지 않은 이벤트: {0}")]
    InvalidEvent(String),

    #[error("위치 파일 손상: {0}")]
    CorruptPosition(String),

    #[error("I/O 에러: {0}")]
    IoError(String),

    #[error("직렬화 에러: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("설정 에러: {0}")]
    ConfigError(String),

    #[error("콜백 에러: {0}")]
    Callback(String),

    #[error("예상치 못한 에러: {0}")]
    Other(String),
}

impl CdcError {
    /// 재연결로 복구 가능한 에러인지 여부
    pub fn is_transport(&self) -> bool {
        matches!(self, CdcError::ConnectionError(_) | CdcError::Transport(_))
    }
}

impl From<io::Error> for CdcError {
    fn from(err: io::Error) -> Self {
        CdcError::IoError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CdcError>;
