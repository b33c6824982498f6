//! MySQL Binlog CDC (Change Data Capture) 소비자 측 제어 계층
//!
//! 외부 replication 클라이언트가 디코딩한 binlog 이벤트를 받아 콜백에 전달하고,
//! 재시작 후에도 이어서 처리할 수 있도록 위치를 저장합니다.
//! 주요 기능:
//! - resume / delivered 두 체크포인트 관리 및 중복 전달 억제
//! - 이벤트 종류별 콜백 라우팅
//! - 4GB 위치 카운터 overflow 보정
//! - 연결 끊김 시 재시도 및 안전한 중단

pub mod cdc_engine;
pub mod checkpoint;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod offset;
pub mod overflow;
pub mod retry;

#[cfg(test)]
mod test_support;

pub use cdc_engine::{CdcEngine, StopHandle};
pub use checkpoint::{should_deliver, CheckpointTracker};
pub use client::{Connector, ReplayClient, ReplicationClient};
pub use config::{CdcConfig, ConnectionConfig, LogLevel};
pub use error::{CdcError, Result};
pub use events::{BinlogEvent, BinlogEventData, EventKind};
pub use offset::{BinlogPosition, PositionFile, PositionStore, ProcessingState};
