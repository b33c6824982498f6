//! 4GB 위치 카운터 overflow 보정
//!
//! Binlog 헤더의 next position은 32비트라서 파일이 4GB를 넘으면 wrap 됩니다.
//! 이벤트 길이는 wrap 되지 않으므로, overflow 이후에는
//! `현재 위치 + 이벤트 길이`로 다음 위치를 계산합니다.

use crate::error::{CdcError, Result};
use crate::events::EventHeader;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverflowCorrector {
    overflowed: bool,
}

impl OverflowCorrector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 현재 파일에서 이미 overflow가 감지되었는지 여부
    pub fn is_active(&self) -> bool {
        self.overflowed
    }

    /// 이 이벤트 기준으로 overflow 상태인지 여부
    pub fn is_overflowed(&self, current: u64, header: &EventHeader) -> bool {
        self.overflowed || (header.next_position != 0 && header.next_position < current)
    }

    /// 보정된 다음 위치 계산. 처음 감지되면 overflow 상태로 전환
    ///
    /// 보정한 위치가 u64 범위를 넘으면 `InvalidEvent`.
    pub fn next_position(&mut self, current: u64, header: &EventHeader) -> Result<u64> {
        if !self.is_overflowed(current, header) {
            return Ok(header.next_position);
        }

        if !self.overflowed {
            warn!(
                "Binlog position overflow detected: current={}, reported next={}",
                current, header.next_position
            );
            self.overflowed = true;
        }

        // FORMAT_DESCRIPTION 이벤트는 항상 0을 보고함
        if header.next_position == 0 {
            return Ok(0);
        }
        current
            .checked_add(u64::from(header.event_length))
            .ok_or_else(|| {
                CdcError::InvalidEvent(format!(
                    "position {} + event length {} is out of range",
                    current, header.event_length
                ))
            })
    }

    /// 새 binlog 파일로 넘어가면 카운터도 다시 시작
    pub fn reset(&mut self) {
        self.overflowed = false;
    }
}
