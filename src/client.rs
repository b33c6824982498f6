//! 외부 replication 클라이언트 인터페이스
//!
//! 실제 MySQL 프로토콜(인증, COM_BINLOG_DUMP, 이벤트 디코딩)은 이 trait의
//! 구현체가 담당합니다. 여기에는 JSON lines 파일을 재생하는 `ReplayClient`가 있습니다.

use crate::config::ConnectionConfig;
use crate::error::{CdcError, Result};
use crate::events::{BinlogEvent, BinlogEventData};
use crate::offset::BinlogPosition;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, info, warn};

/// 디코딩된 binlog 이벤트를 하나씩 내어주는 클라이언트
#[async_trait]
pub trait ReplicationClient: Send {
    /// 서버에 연결. 핸드셰이크가 거부되면 false
    async fn connect(&mut self) -> Result<bool>;

    /// 다음 이벤트를 읽을 위치 지정
    async fn set_position(&mut self, filename: &str, position: u64) -> Result<()>;

    /// 다음 이벤트를 기다림. 스트림이 끝나면 None
    async fn wait_for_next_event(&mut self) -> Result<Option<BinlogEvent>>;

    /// 연결이 닫혔는지 여부
    fn is_closed(&self) -> bool;
}

/// 연결 설정을 받아 재연결마다 새 클라이언트를 만드는 팩토리
pub type Connector = Box<dyn FnMut(&ConnectionConfig) -> Box<dyn ReplicationClient> + Send>;

/// JSON lines 파일에 기록된 이벤트를 재생하는 클라이언트
///
/// 한 줄에 `BinlogEvent` 하나가 직렬화되어 있어야 합니다.
pub struct ReplayClient {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    /// 이 위치 이전에 시작하는 이벤트는 건너뜀
    seek: Option<BinlogPosition>,
    /// 위치 이동 직후 내보낼 가짜 rotate 이벤트
    pending_rotate: Option<BinlogEvent>,
    current_file: Option<String>,
    /// 다음 이벤트가 시작하는 위치
    cursor: u64,
    line_number: usize,
    closed: bool,
}

impl ReplayClient {
    pub fn new(path: impl AsRef<Path>) -> Self {
        ReplayClient {
            path: path.as_ref().to_path_buf(),
            lines: None,
            seek: None,
            pending_rotate: None,
            current_file: None,
            cursor: 0,
            line_number: 0,
            closed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn track(&mut self, event: &BinlogEvent) {
        match &event.data {
            BinlogEventData::Rotate(rotate) => {
                self.current_file = Some(rotate.next_binlog_name.clone());
                self.cursor = rotate.position;
            }
            _ if event.header.next_position != 0 => {
                self.cursor = event.header.next_position;
            }
            _ => {}
        }
    }

    /// 위치 이동 중이면 아직 목표에 도달하지 않은 이벤트인지 판단
    fn before_seek_target(&self, start: u64, event: &BinlogEvent) -> bool {
        let Some(target) = &self.seek else {
            return false;
        };
        let in_target_file = self.current_file.as_deref() == Some(target.filename.as_str());
        matches!(event.data, BinlogEventData::Rotate(_))
            || !in_target_file
            || start < target.position
    }
}

#[async_trait]
impl ReplicationClient for ReplayClient {
    async fn connect(&mut self) -> Result<bool> {
        match File::open(&self.path).await {
            Ok(file) => {
                info!("Replaying binlog events from {}", self.path.display());
                self.lines = Some(BufReader::new(file).lines());
                self.current_file = None;
                self.cursor = 0;
                self.line_number = 0;
                self.closed = false;
                Ok(true)
            }
            Err(e) => {
                warn!("Failed to open {}: {}", self.path.display(), e);
                self.closed = true;
                Ok(false)
            }
        }
    }

    async fn set_position(&mut self, filename: &str, position: u64) -> Result<()> {
        if self.closed {
            return Err(CdcError::Transport("set_position on closed client".to_string()));
        }
        debug!("Seeking replay to {}:{}", filename, position);
        self.seek = Some(BinlogPosition::new(filename, position));
        self.pending_rotate = Some(BinlogEvent::rotate(filename, position));
        Ok(())
    }

    async fn wait_for_next_event(&mut self) -> Result<Option<BinlogEvent>> {
        if self.closed {
            return Err(CdcError::Transport("client is not connected".to_string()));
        }
        if let Some(rotate) = self.pending_rotate.take() {
            return Ok(Some(rotate));
        }

        loop {
            let next_line = match self.lines.as_mut() {
                Some(lines) => lines.next_line().await,
                None => return Err(CdcError::Transport("client is not connected".to_string())),
            };
            let line = match next_line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("Replay file exhausted after {} lines", self.line_number);
                    self.closed = true;
                    self.lines = None;
                    return Ok(None);
                }
                Err(e) => {
                    self.closed = true;
                    self.lines = None;
                    return Err(CdcError::Transport(format!(
                        "{}: {}",
                        self.path.display(),
                        e
                    )));
                }
            };
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }

            let event: BinlogEvent = serde_json::from_str(&line).map_err(|e| {
                CdcError::InvalidEvent(format!(
                    "{}:{}: {}",
                    self.path.display(),
                    self.line_number,
                    e
                ))
            })?;

            let start = self.cursor;
            self.track(&event);
            if self.before_seek_target(start, &event) {
                continue;
            }
            self.seek = None;
            return Ok(Some(event));
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
