//! 테스트용 저장소와 클라이언트

use crate::client::{Connector, ReplicationClient};
use crate::config::ConnectionConfig;
use crate::error::{CdcError, Result};
use crate::events::{
    BinlogEvent, BinlogEventData, EventHeader, OperationType, QueryEventData, RowsData,
    TableMapData, XidData,
};
use crate::offset::{BinlogPosition, PositionStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub fn pos(filename: &str, position: u64) -> BinlogPosition {
    BinlogPosition::new(filename, position)
}

pub fn query(next: u64) -> BinlogEvent {
    BinlogEvent::new(
        EventHeader::new(next, 60),
        BinlogEventData::Query(QueryEventData {
            thread_id: 1,
            exec_time: 0,
            database: "test".into(),
            query: "BEGIN".into(),
        }),
    )
}

pub fn table_map(next: u64, length: u32) -> BinlogEvent {
    BinlogEvent::new(
        EventHeader::new(next, length),
        BinlogEventData::TableMap(TableMapData {
            table_id: 1,
            database: "test".into(),
            table: "users".into(),
            column_types: vec![3, 15],
        }),
    )
}

pub fn rows(next: u64, length: u32) -> BinlogEvent {
    BinlogEvent::new(
        EventHeader::new(next, length),
        BinlogEventData::Rows(RowsData {
            table_id: 1,
            op: OperationType::Insert,
            rows: vec![],
        }),
    )
}

pub fn xid(next: u64) -> BinlogEvent {
    BinlogEvent::new(
        EventHeader::new(next, 31),
        BinlogEventData::Xid(XidData { xid: 1 }),
    )
}

/// 기록된 위치를 순서대로 남기는 저장소
#[derive(Clone, Default)]
pub struct RecordingStore {
    initial: Option<BinlogPosition>,
    writes: Arc<Mutex<Vec<BinlogPosition>>>,
}

impl RecordingStore {
    pub fn starting_at(filename: &str, position: u64) -> Self {
        RecordingStore {
            initial: Some(pos(filename, position)),
            ..Default::default()
        }
    }

    pub fn writes(&self) -> Vec<BinlogPosition> {
        self.writes.lock().clone()
    }
}

impl PositionStore for RecordingStore {
    fn read(&mut self) -> Result<Option<BinlogPosition>> {
        Ok(self
            .writes
            .lock()
            .last()
            .cloned()
            .or_else(|| self.initial.clone()))
    }

    fn update(&mut self, position: &BinlogPosition) -> Result<()> {
        self.writes.lock().push(position.clone());
        Ok(())
    }
}

/// 항상 쓰기에 실패하는 저장소
pub struct FailingStore;

impl PositionStore for FailingStore {
    fn read(&mut self) -> Result<Option<BinlogPosition>> {
        Ok(None)
    }

    fn update(&mut self, _position: &BinlogPosition) -> Result<()> {
        Err(CdcError::IoError("disk full".to_string()))
    }
}

/// 스크립트 한 단계
pub enum Step {
    Event(BinlogEvent),
    /// 디코딩할 수 없는 이벤트
    Malformed,
    /// 연결 끊김
    Drop,
    /// 다음 이벤트가 오지 않음
    Hang,
}

/// 연결마다 준비된 스크립트를 하나씩 소비하는 클라이언트 팩토리
#[derive(Clone, Default)]
pub struct ScriptedServer {
    scripts: Arc<Mutex<VecDeque<Vec<Step>>>>,
    refuse: Arc<AtomicBool>,
    drop_forever: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
    seeks: Arc<Mutex<Vec<BinlogPosition>>>,
    urls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedServer {
    pub fn new(scripts: Vec<Vec<Step>>) -> Self {
        ScriptedServer {
            scripts: Arc::new(Mutex::new(scripts.into())),
            ..Default::default()
        }
    }

    /// 모든 핸드셰이크를 거부
    pub fn refusing() -> Self {
        let server = Self::default();
        server.refuse.store(true, Ordering::SeqCst);
        server
    }

    /// 연결은 되지만 첫 읽기에서 항상 끊김
    pub fn always_dropping() -> Self {
        let server = Self::default();
        server.drop_forever.store(true, Ordering::SeqCst);
        server
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn seeks(&self) -> Vec<BinlogPosition> {
        self.seeks.lock().clone()
    }

    /// 클라이언트를 만들 때 받은 연결 URL
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }

    pub fn connector(&self) -> Connector {
        let server = self.clone();
        Box::new(move |connection: &ConnectionConfig| -> Box<dyn ReplicationClient> {
            server.urls.lock().push(connection.mysql_url());
            let steps = if server.drop_forever.load(Ordering::SeqCst) {
                VecDeque::from(vec![Step::Drop])
            } else {
                server.scripts.lock().pop_front().unwrap_or_default().into()
            };
            Box::new(ScriptedClient {
                server: server.clone(),
                steps,
                closed: true,
            })
        })
    }
}

pub struct ScriptedClient {
    server: ScriptedServer,
    steps: VecDeque<Step>,
    closed: bool,
}

#[async_trait]
impl ReplicationClient for ScriptedClient {
    async fn connect(&mut self) -> Result<bool> {
        self.server.attempts.fetch_add(1, Ordering::SeqCst);
        if self.server.refuse.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.closed = false;
        Ok(true)
    }

    async fn set_position(&mut self, filename: &str, position: u64) -> Result<()> {
        self.server.seeks.lock().push(pos(filename, position));
        Ok(())
    }

    async fn wait_for_next_event(&mut self) -> Result<Option<BinlogEvent>> {
        match self.steps.pop_front() {
            Some(Step::Event(event)) => Ok(Some(event)),
            Some(Step::Malformed) => Err(CdcError::InvalidEvent("truncated event body".to_string())),
            Some(Step::Drop) => {
                self.closed = true;
                Err(CdcError::Transport("connection reset by peer".to_string()))
            }
            Some(Step::Hang) => std::future::pending::<Result<Option<BinlogEvent>>>().await,
            None => {
                self.closed = true;
                Ok(None)
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
