//! 이벤트 종류별 콜백 테이블

use crate::error::Result;
use crate::events::{BinlogEvent, EventKind};
use tracing::debug;

/// 이벤트 콜백. 에러를 반환하면 해당 이벤트의 체크포인트는 갱신되지 않음
pub type Callback = Box<dyn FnMut(&BinlogEvent) -> Result<()> + Send>;

/// 종류별로 최대 하나의 콜백을 갖는 고정 크기 테이블
pub struct EventDispatcher {
    callbacks: [Option<Callback>; EventKind::CALLBACK_KINDS],
}

impl Default for EventDispatcher {
    fn default() -> Self {
        EventDispatcher {
            callbacks: std::array::from_fn(|_| None),
        }
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 콜백 등록. 같은 종류에 다시 등록하면 이전 콜백을 대체
    ///
    /// Unknown 종류는 콜백을 가질 수 없으므로 무시됩니다.
    pub fn register(&mut self, kind: EventKind, callback: Callback) {
        match kind.callback_index() {
            Some(index) => self.callbacks[index] = Some(callback),
            None => debug!("Ignoring callback registration for {} events", kind),
        }
    }

    /// 이벤트 종류에 맞는 콜백 호출. 호출했으면 true
    pub fn deliver(&mut self, event: &BinlogEvent) -> Result<bool> {
        let kind = event.kind();
        let callback = kind
            .callback_index()
            .and_then(|index| self.callbacks[index].as_mut());

        match callback {
            Some(callback) => {
                callback(event)?;
                Ok(true)
            }
            None => {
                debug!("Unhandled: {}", kind);
                Ok(false)
            }
        }
    }
}
