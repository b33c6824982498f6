//! Binlog 처리 위치 추적 및 저장
//!
//! Binlog 파일명 + 위치로 정확한 재시작 지점을 추적합니다.
//! 예: "mysql-bin.000003" 파일의 4097 바이트 위치
//!
//! 위치 파일 형식은 `"<파일명>\t<위치>"` 한 줄이며 개행 문자는 없습니다.
//! 갱신할 때마다 파일 처음부터 덮어쓰고 남은 부분은 잘라냅니다.

use crate::error::{CdcError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Binlog 파일 위치 정보
///
/// 정렬 순서는 파일명(사전순) 다음 위치(숫자)입니다.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BinlogPosition {
    /// 바이너리 로그 파일명 (e.g., "mysql-bin.000001")
    pub filename: String,
    /// 바이트 위치
    pub position: u64,
}

impl BinlogPosition {
    pub fn new(filename: impl Into<String>, position: u64) -> Self {
        BinlogPosition {
            filename: filename.into(),
            position,
        }
    }

    /// 위치 파일에 기록되는 한 줄
    pub fn to_line(&self) -> String {
        format!("{}\t{}", self.filename, self.position)
    }

    /// 위치 파일 내용 파싱. 빈 내용은 저장된 위치가 없다는 뜻
    pub fn parse_line(content: &str) -> Result<Option<Self>> {
        let line = content.lines().next().unwrap_or("");
        if line.is_empty() {
            return Ok(None);
        }

        let (filename, position) = line
            .split_once('\t')
            .ok_or_else(|| CdcError::CorruptPosition(format!("missing tab in {:?}", line)))?;
        if filename.is_empty() {
            return Err(CdcError::CorruptPosition(format!(
                "empty binlog filename in {:?}",
                line
            )));
        }
        let position = position.trim_end().parse::<u64>().map_err(|e| {
            CdcError::CorruptPosition(format!("invalid position {:?}: {}", position, e))
        })?;

        Ok(Some(BinlogPosition::new(filename, position)))
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.position)
    }
}

/// 체크포인트 영속화 대상
///
/// 쓰기는 동기적으로 끝나야 하며, 반환 이후에는 크래시가 나도 값이 남아 있어야 합니다.
pub trait PositionStore: Send {
    /// 저장된 위치 읽기. 아무것도 저장되지 않았으면 None
    fn read(&mut self) -> Result<Option<BinlogPosition>>;

    /// 위치 덮어쓰기
    fn update(&mut self, position: &BinlogPosition) -> Result<()>;
}

/// 파일 기반 위치 저장소
pub struct PositionFile {
    path: PathBuf,
    file: File,
}

impl PositionFile {
    /// 파일을 열고, 없으면 빈 파일을 생성
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| CdcError::IoError(format!("{}: {}", path.display(), e)))?;

        Ok(PositionFile { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PositionStore for PositionFile {
    fn read(&mut self) -> Result<Option<BinlogPosition>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut content = String::new();
        self.file.read_to_string(&mut content)?;
        BinlogPosition::parse_line(&content)
    }

    fn update(&mut self, position: &BinlogPosition) -> Result<()> {
        let line = position.to_line();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(line.as_bytes())?;
        self.file.set_len(line.len() as u64)?;
        self.file.sync_data()?;
        debug!("Saved {} to {}", position, self.path.display());
        Ok(())
    }
}

impl fmt::Debug for PositionFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PositionFile")
            .field("path", &self.path)
            .finish()
    }
}

/// 엔진 처리 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingState {
    /// 연결 없음 (시작 전 또는 에러로 끊김)
    Disconnected,
    /// 연결 및 위치 이동 중
    Connecting,
    /// 스트리밍 처리 중
    Replicating,
    /// 중단됨
    Stopped,
}
