//! 디코딩된 Binlog 이벤트 타입 및 데이터 구조 정의
//!
//! 바이너리 파싱은 외부 replication 클라이언트의 몫이고,
//! 이 모듈은 파싱이 끝난 이벤트의 형태만 정의합니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 콜백 라우팅에 사용하는 이벤트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// 쿼리 이벤트 (DDL, BEGIN, autocommit 문장)
    Query,
    /// 로테이션 이벤트 (새 binlog 파일)
    Rotate,
    /// INTVAR 이벤트 (LAST_INSERT_ID, INSERT_ID)
    IntVar,
    /// 사용자 변수 이벤트
    UserVar,
    /// FORMAT_DESCRIPTION 이벤트
    FormatDescription,
    /// 트랜잭션 커밋 (XID)
    Xid,
    /// 테이블 맵 이벤트 (행 이벤트 앞에 옴)
    TableMap,
    /// WRITE/UPDATE/DELETE_ROWS 이벤트
    Rows,
    /// INCIDENT 이벤트
    Incident,
    /// 알고 있지만 디코딩하지 않는 이벤트
    Unimplemented,
    /// 알 수 없는 이벤트
    Unknown,
}

impl EventKind {
    /// 콜백을 등록할 수 있는 종류의 개수 (Unknown 제외)
    pub const CALLBACK_KINDS: usize = 10;

    /// 콜백 테이블 인덱스. Unknown은 콜백을 가질 수 없음
    pub fn callback_index(self) -> Option<usize> {
        let index = match self {
            EventKind::Query => 0,
            EventKind::Rotate => 1,
            EventKind::IntVar => 2,
            EventKind::UserVar => 3,
            EventKind::FormatDescription => 4,
            EventKind::Xid => 5,
            EventKind::TableMap => 6,
            EventKind::Rows => 7,
            EventKind::Incident => 8,
            EventKind::Unimplemented => 9,
            EventKind::Unknown => return None,
        };
        Some(index)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Query => "query",
            EventKind::Rotate => "rotate",
            EventKind::IntVar => "int_var",
            EventKind::UserVar => "user_var",
            EventKind::FormatDescription => "format_description",
            EventKind::Xid => "xid",
            EventKind::TableMap => "table_map",
            EventKind::Rows => "rows",
            EventKind::Incident => "incident",
            EventKind::Unimplemented => "unimplemented",
            EventKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binlog 이벤트 헤더
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    /// 이벤트 타임스탬프 (초 단위)
    #[serde(default)]
    pub timestamp: u32,
    /// MySQL 서버 ID
    #[serde(default)]
    pub server_id: u32,
    /// 이벤트 길이 (바이트). 프로토콜상 32비트
    #[serde(default)]
    pub event_length: u32,
    /// 서버가 보고한 다음 이벤트 위치 (4GB에서 wrap 될 수 있음)
    #[serde(default)]
    pub next_position: u64,
}

impl EventHeader {
    pub fn new(next_position: u64, event_length: u32) -> Self {
        EventHeader {
            next_position,
            event_length,
            ..Default::default()
        }
    }
}

/// 테이블 맵 정보
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMapData {
    pub table_id: u64,
    pub database: String,
    pub table: String,
    #[serde(default)]
    pub column_types: Vec<u8>,
}

/// 행 변경 연산 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Insert,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Insert => "INSERT",
            OperationType::Update => "UPDATE",
            OperationType::Delete => "DELETE",
        }
    }
}

/// 변경 전후 행 이미지. INSERT는 after만, DELETE는 before만 가짐
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowImage {
    #[serde(default)]
    pub before: Option<Vec<CellValue>>,
    #[serde(default)]
    pub after: Option<Vec<CellValue>>,
}

/// WRITE/UPDATE/DELETE_ROWS 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowsData {
    pub table_id: u64,
    pub op: OperationType,
    #[serde(default)]
    pub rows: Vec<RowImage>,
}

/// 셀 값 (다양한 MySQL 타입 지원)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CellValue {
    Null,
    Int64(i64),
    UInt64(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    DateTime(DateTime<Utc>),
    Decimal(String),
    Json(serde_json::Value),
}

impl CellValue {
    pub fn as_string(&self) -> Option<String> {
        match self {
            CellValue::String(s) | CellValue::Decimal(s) => Some(s.clone()),
            CellValue::Int64(i) => Some(i.to_string()),
            CellValue::UInt64(u) => Some(u.to_string()),
            CellValue::Double(d) => Some(d.to_string()),
            CellValue::DateTime(dt) => Some(dt.to_rfc3339()),
            CellValue::Json(v) => Some(v.to_string()),
            CellValue::Null => Some("NULL".to_string()),
            CellValue::Bytes(_) => None,
        }
    }
}

/// 쿼리 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryEventData {
    #[serde(default)]
    pub thread_id: u32,
    #[serde(default)]
    pub exec_time: u32,
    #[serde(default)]
    pub database: String,
    pub query: String,
}

/// 회전 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotateEventData {
    /// 새 바이너리 로그 파일명
    pub next_binlog_name: String,
    /// 새 파일의 시작 위치
    pub position: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntVarData {
    pub var_type: u8,
    pub value: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserVarData {
    pub name: String,
    /// NULL 변수는 None
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatDescriptionData {
    pub binlog_version: u16,
    pub server_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XidData {
    pub xid: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentData {
    pub incident: u16,
    #[serde(default)]
    pub message: String,
}

/// 디코딩하지 않은 이벤트의 원래 타입 코드
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEventData {
    pub type_code: u8,
}

/// 모든 Binlog 이벤트를 포함하는 열거형
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BinlogEventData {
    Query(QueryEventData),
    Rotate(RotateEventData),
    IntVar(IntVarData),
    UserVar(UserVarData),
    FormatDescription(FormatDescriptionData),
    Xid(XidData),
    TableMap(TableMapData),
    Rows(RowsData),
    Incident(IncidentData),
    Unimplemented(RawEventData),
    Unknown(RawEventData),
}

impl BinlogEventData {
    pub fn kind(&self) -> EventKind {
        match self {
            BinlogEventData::Query(_) => EventKind::Query,
            BinlogEventData::Rotate(_) => EventKind::Rotate,
            BinlogEventData::IntVar(_) => EventKind::IntVar,
            BinlogEventData::UserVar(_) => EventKind::UserVar,
            BinlogEventData::FormatDescription(_) => EventKind::FormatDescription,
            BinlogEventData::Xid(_) => EventKind::Xid,
            BinlogEventData::TableMap(_) => EventKind::TableMap,
            BinlogEventData::Rows(_) => EventKind::Rows,
            BinlogEventData::Incident(_) => EventKind::Incident,
            BinlogEventData::Unimplemented(_) => EventKind::Unimplemented,
            BinlogEventData::Unknown(_) => EventKind::Unknown,
        }
    }
}

/// 완성된 Binlog 이벤트
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinlogEvent {
    /// 이벤트 헤더
    #[serde(default)]
    pub header: EventHeader,
    /// 이벤트 데이터
    pub data: BinlogEventData,
}

impl BinlogEvent {
    pub fn new(header: EventHeader, data: BinlogEventData) -> Self {
        BinlogEvent { header, data }
    }

    /// 로테이션 이벤트 생성 (서버가 덤프 시작 시 보내는 가짜 rotate 포함)
    pub fn rotate(next_binlog_name: impl Into<String>, position: u64) -> Self {
        BinlogEvent {
            header: EventHeader::default(),
            data: BinlogEventData::Rotate(RotateEventData {
                next_binlog_name: next_binlog_name.into(),
                position,
            }),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }

    pub fn next_position(&self) -> u64 {
        self.header.next_position
    }
}
