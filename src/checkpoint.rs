//! 재시작 체크포인트와 전달 체크포인트 관리
//!
//! 두 개의 위치를 따로 추적합니다:
//! - resume: 재연결 시 이동할 위치. 여기서 다시 읽어도 유실이 없어야 함
//! - delivered: 콜백이 이미 호출된 마지막 이벤트 위치. 재전달 억제에만 사용
//!
//! resume 위치가 delivered 위치보다 뒤에 있어야만 이벤트를 콜백에 넘깁니다.

use crate::dispatcher::EventDispatcher;
use crate::error::Result;
use crate::events::{BinlogEvent, BinlogEventData, RotateEventData};
use crate::offset::{BinlogPosition, PositionStore};
use crate::overflow::OverflowCorrector;
use std::fmt;
use tracing::{debug, info, warn};

/// resume 위치가 delivered 위치보다 엄격하게 뒤에 있을 때만 true
///
/// 둘 중 하나라도 없으면 항상 처리 대상입니다.
///
/// ```text
/// resume                    delivered                 result
/// -----------------------------------------------------------
/// mysql-bin.000004 00001    mysql-bin.000003 00001    true
/// mysql-bin.000004 00030    mysql-bin.000004 00001    true
/// mysql-bin.000004 00030    mysql-bin.000004 00030    false
/// mysql-bin.000004 00030    mysql-bin.000004 00050    false
/// mysql-bin.000004 00030    mysql-bin.000005 00001    false
/// ```
pub fn should_deliver(resume: Option<&BinlogPosition>, delivered: Option<&BinlogPosition>) -> bool {
    match (resume, delivered) {
        (Some(resume), Some(delivered)) => resume > delivered,
        _ => true,
    }
}

/// 이름이 붙은 위치 + 선택적 저장소
pub struct Checkpoint {
    label: &'static str,
    filename: Option<String>,
    position: Option<u64>,
    store: Option<Box<dyn PositionStore>>,
}

impl Checkpoint {
    pub fn new(label: &'static str) -> Self {
        Checkpoint {
            label,
            filename: None,
            position: None,
            store: None,
        }
    }

    /// 저장소를 연결하고 저장된 위치를 읽어옴
    pub fn attach(&mut self, mut store: Box<dyn PositionStore>) -> Result<()> {
        let loaded = store.read()?;
        match &loaded {
            Some(position) => info!("Loaded {} checkpoint: {}", self.label, position),
            None => info!("No {} checkpoint stored yet", self.label),
        }
        self.set_loaded(loaded);
        self.store = Some(store);
        Ok(())
    }

    /// 저장소에 마지막으로 기록된 위치로 되돌림. 저장소가 없으면 그대로 유지
    pub fn reload(&mut self) -> Result<()> {
        let Some(store) = self.store.as_mut() else {
            return Ok(());
        };
        let loaded = store.read()?;
        debug!(
            "Reloaded {} checkpoint: {:?}",
            self.label,
            loaded.as_ref().map(|p| p.to_string())
        );
        self.set_loaded(loaded);
        Ok(())
    }

    fn set_loaded(&mut self, loaded: Option<BinlogPosition>) {
        match loaded {
            Some(BinlogPosition { filename, position }) => {
                self.filename = Some(filename);
                self.position = Some(position);
            }
            None => {
                self.filename = None;
                self.position = None;
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.filename.is_some() && self.position.is_some()
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn position(&self) -> Option<u64> {
        self.position
    }

    pub fn to_position(&self) -> Option<BinlogPosition> {
        match (&self.filename, self.position) {
            (Some(filename), Some(position)) => Some(BinlogPosition::new(filename.clone(), position)),
            _ => None,
        }
    }

    /// 주어진 값으로 갱신하고 저장소에 즉시 기록
    ///
    /// None인 필드는 기존 값을 유지합니다. 위치가 아직 완전하지 않으면 기록하지 않습니다.
    pub fn save(&mut self, filename: Option<&str>, position: Option<u64>) -> Result<()> {
        if let Some(filename) = filename {
            self.filename = Some(filename.to_string());
        }
        if let Some(position) = position {
            self.position = Some(position);
        }

        let Some(store) = self.store.as_mut() else {
            return Ok(());
        };
        match (&self.filename, self.position) {
            (Some(filename), Some(position)) => {
                store.update(&BinlogPosition::new(filename.clone(), position))
            }
            _ => {
                debug!("Skipping {} checkpoint write: position incomplete", self.label);
                Ok(())
            }
        }
    }

    /// 메모리상의 위치만 앞으로 이동 (저장하지 않음)
    pub fn advance(&mut self, next: u64) {
        if self.position.map_or(true, |current| next > current) {
            self.position = Some(next);
        }
    }
}

impl fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkpoint")
            .field("label", &self.label)
            .field("filename", &self.filename)
            .field("position", &self.position)
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

/// resume/delivered 체크포인트와 overflow 상태를 묶은 처리기
#[derive(Debug)]
pub struct CheckpointTracker {
    resume: Checkpoint,
    delivered: Checkpoint,
    overflow: OverflowCorrector,
    /// 직전 이벤트가 테이블 맵이었는지 여부
    in_table_map_run: bool,
}

impl Default for CheckpointTracker {
    fn default() -> Self {
        CheckpointTracker {
            resume: Checkpoint::new("resume"),
            delivered: Checkpoint::new("delivered"),
            overflow: OverflowCorrector::new(),
            in_table_map_run: false,
        }
    }
}

impl CheckpointTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resume(&self) -> &Checkpoint {
        &self.resume
    }

    pub fn delivered(&self) -> &Checkpoint {
        &self.delivered
    }

    pub fn attach_resume_store(&mut self, store: Box<dyn PositionStore>) -> Result<()> {
        self.resume.attach(store)
    }

    pub fn attach_delivered_store(&mut self, store: Box<dyn PositionStore>) -> Result<()> {
        self.delivered.attach(store)
    }

    pub fn is_overflowed(&self) -> bool {
        self.overflow.is_active()
    }

    /// 현재 resume 위치가 처리 대상인지 여부
    pub fn should_deliver(&self) -> bool {
        should_deliver(
            self.resume.to_position().as_ref(),
            self.delivered.to_position().as_ref(),
        )
    }

    /// 재연결 준비: resume 위치를 마지막 저장값으로 되돌리고 테이블 맵 연속 상태 초기화
    pub fn prepare_reconnect(&mut self) -> Result<()> {
        self.in_table_map_run = false;
        self.resume.reload()
    }

    /// 이벤트 하나를 처리
    ///
    /// 콜백이 끝난 뒤에 체크포인트를 기록하므로, 저장된 delivered 위치는
    /// 항상 실제로 전달이 끝난 이벤트를 가리킵니다.
    pub fn handle_event(
        &mut self,
        event: &BinlogEvent,
        dispatcher: &mut EventDispatcher,
    ) -> Result<()> {
        let processable = self.should_deliver();

        // 로테이션이 resume을 바꾸기 전의 위치
        let cur_filename = self.resume.filename().map(str::to_owned);
        let cur_position = self.resume.position().unwrap_or(0);
        let was_overflowed = self.overflow.is_active();

        let next_position = match &event.data {
            BinlogEventData::Rotate(_) | BinlogEventData::Unknown(_) => None,
            _ => Some(self.overflow.next_position(cur_position, &event.header)?),
        };

        let after_table_map = self.in_table_map_run;
        self.in_table_map_run = matches!(event.data, BinlogEventData::TableMap(_));

        if !processable {
            debug!(
                "Skipping already delivered {} event at {}:{}",
                event.kind(),
                cur_filename.as_deref().unwrap_or("-"),
                cur_position
            );
            match &event.data {
                BinlogEventData::Rotate(rotate) => {
                    dispatcher.deliver(event)?;
                    self.rotate(rotate, cur_filename.as_deref())?;
                }
                BinlogEventData::Query(_) => {
                    self.resume.save(cur_filename.as_deref(), next_position)?;
                }
                _ => {}
            }
        } else {
            match &event.data {
                BinlogEventData::Query(_) => {
                    dispatcher.deliver(event)?;
                    self.delivered
                        .save(cur_filename.as_deref(), Some(cur_position))?;
                    self.resume.save(cur_filename.as_deref(), next_position)?;
                }
                BinlogEventData::Rotate(rotate) => {
                    dispatcher.deliver(event)?;
                    self.rotate(rotate, cur_filename.as_deref())?;
                }
                BinlogEventData::TableMap(_) => {
                    dispatcher.deliver(event)?;
                    // 여러 테이블에 걸친 문장은 테이블 맵이 연달아 옴. 첫 번째에서만 저장
                    if !after_table_map && !was_overflowed {
                        self.resume
                            .save(cur_filename.as_deref(), Some(cur_position))?;
                    }
                }
                BinlogEventData::Rows(_) => {
                    dispatcher.deliver(event)?;
                    self.delivered
                        .save(cur_filename.as_deref(), Some(cur_position))?;
                }
                BinlogEventData::IntVar(_)
                | BinlogEventData::UserVar(_)
                | BinlogEventData::FormatDescription(_)
                | BinlogEventData::Xid(_)
                | BinlogEventData::Incident(_)
                | BinlogEventData::Unimplemented(_) => {
                    dispatcher.deliver(event)?;
                }
                BinlogEventData::Unknown(raw) => {
                    warn!("Not Implemented: event type {}", raw.type_code);
                }
            }
        }

        // FORMAT_DESCRIPTION은 next position으로 0을 보고하므로 커질 때만 이동
        if let Some(next) = next_position {
            self.resume.advance(next);
        }
        Ok(())
    }

    fn rotate(&mut self, rotate: &RotateEventData, cur_filename: Option<&str>) -> Result<()> {
        if cur_filename == Some(rotate.next_binlog_name.as_str()) {
            debug!("Ignoring rotate to current file {}", rotate.next_binlog_name);
            return Ok(());
        }

        info!(
            "Rotating to {}:{}",
            rotate.next_binlog_name, rotate.position
        );
        self.overflow.reset();
        self.resume
            .save(Some(&rotate.next_binlog_name), Some(rotate.position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Callback;
    use crate::error::CdcError;
    use crate::events::{
        EventHeader, EventKind, FormatDescriptionData, IncidentData, IntVarData, RawEventData,
        UserVarData,
    };
    use crate::test_support::{pos, query, rows, table_map, xid, RecordingStore};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn recording_dispatcher() -> (EventDispatcher, Arc<Mutex<Vec<EventKind>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        for kind in [
            EventKind::Query,
            EventKind::Rotate,
            EventKind::IntVar,
            EventKind::UserVar,
            EventKind::FormatDescription,
            EventKind::Xid,
            EventKind::TableMap,
            EventKind::Rows,
            EventKind::Incident,
            EventKind::Unimplemented,
        ] {
            let seen = Arc::clone(&seen);
            let callback: Callback = Box::new(move |event: &BinlogEvent| {
                seen.lock().push(event.kind());
                Ok(())
            });
            dispatcher.register(kind, callback);
        }
        (dispatcher, seen)
    }

    #[test]
    fn test_should_deliver_same_file() {
        for (resume, delivered) in [(1u64, 0u64), (30, 1), (u64::MAX, 4)] {
            assert!(should_deliver(
                Some(&pos("bin.1", resume)),
                Some(&pos("bin.1", delivered))
            ));
            assert!(!should_deliver(
                Some(&pos("bin.1", delivered)),
                Some(&pos("bin.1", resume))
            ));
        }
        assert!(!should_deliver(Some(&pos("bin.1", 30)), Some(&pos("bin.1", 30))));
    }

    #[test]
    fn test_should_deliver_across_files_and_unset() {
        assert!(should_deliver(Some(&pos("bin.4", 1)), Some(&pos("bin.3", 1))));
        assert!(!should_deliver(Some(&pos("bin.4", 30)), Some(&pos("bin.5", 1))));
        assert!(should_deliver(Some(&pos("bin.4", 30)), None));
        assert!(should_deliver(None, Some(&pos("bin.4", 30))));
    }

    #[test]
    fn test_duplicate_rotate_saves_once() {
        let store = RecordingStore::default();
        let mut tracker = CheckpointTracker::new();
        tracker.attach_resume_store(Box::new(store.clone())).unwrap();
        let (mut dispatcher, seen) = recording_dispatcher();

        tracker
            .handle_event(&BinlogEvent::rotate("bin.1", 4), &mut dispatcher)
            .unwrap();
        tracker
            .handle_event(&BinlogEvent::rotate("bin.1", 4), &mut dispatcher)
            .unwrap();

        assert_eq!(store.writes(), vec![pos("bin.1", 4)]);
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_table_map_run_saves_once() {
        let store = RecordingStore::default();
        let mut tracker = CheckpointTracker::new();
        tracker.attach_resume_store(Box::new(store.clone())).unwrap();
        let (mut dispatcher, _) = recording_dispatcher();

        tracker
            .handle_event(&BinlogEvent::rotate("bin.1", 100), &mut dispatcher)
            .unwrap();
        tracker.handle_event(&table_map(150, 50), &mut dispatcher).unwrap();
        tracker.handle_event(&table_map(200, 50), &mut dispatcher).unwrap();
        tracker.handle_event(&table_map(250, 50), &mut dispatcher).unwrap();
        tracker.handle_event(&rows(300, 50), &mut dispatcher).unwrap();
        tracker.handle_event(&table_map(350, 50), &mut dispatcher).unwrap();

        assert_eq!(
            store.writes(),
            vec![pos("bin.1", 100), pos("bin.1", 100), pos("bin.1", 300)]
        );
    }

    #[test]
    fn test_overflow_survives_until_new_file() {
        let four_gb = 1u64 << 32;
        let mut tracker = CheckpointTracker::new();
        let (mut dispatcher, _) = recording_dispatcher();

        tracker
            .handle_event(&BinlogEvent::rotate("bin.1", four_gb - 100), &mut dispatcher)
            .unwrap();
        tracker.handle_event(&rows(50, 150), &mut dispatcher).unwrap();
        assert!(tracker.is_overflowed());
        assert_eq!(tracker.resume().position(), Some(four_gb + 50));

        tracker.handle_event(&xid(80), &mut dispatcher).unwrap();
        assert!(tracker.is_overflowed());
        assert_eq!(tracker.resume().position(), Some(four_gb + 81));

        // 같은 파일로의 rotate는 overflow를 해제하지 않음
        tracker
            .handle_event(&BinlogEvent::rotate("bin.1", 4), &mut dispatcher)
            .unwrap();
        assert!(tracker.is_overflowed());

        tracker
            .handle_event(&BinlogEvent::rotate("bin.2", 4), &mut dispatcher)
            .unwrap();
        assert!(!tracker.is_overflowed());
        assert_eq!(tracker.resume().to_position(), Some(pos("bin.2", 4)));
    }

    #[test]
    fn test_table_map_not_saved_while_overflowed() {
        let four_gb = 1u64 << 32;
        let store = RecordingStore::default();
        let mut tracker = CheckpointTracker::new();
        tracker.attach_resume_store(Box::new(store.clone())).unwrap();
        let (mut dispatcher, _) = recording_dispatcher();

        tracker
            .handle_event(&BinlogEvent::rotate("bin.1", four_gb - 100), &mut dispatcher)
            .unwrap();
        tracker.handle_event(&rows(50, 150), &mut dispatcher).unwrap();
        tracker.handle_event(&table_map(100, 50), &mut dispatcher).unwrap();

        assert_eq!(store.writes(), vec![pos("bin.1", four_gb - 100)]);
        assert_eq!(tracker.resume().position(), Some(four_gb + 100));
    }

    #[test]
    fn test_event_sequence_checkpoint_writes() {
        let resume_store = RecordingStore::default();
        let delivered_store = RecordingStore::default();
        let mut tracker = CheckpointTracker::new();
        tracker
            .attach_resume_store(Box::new(resume_store.clone()))
            .unwrap();
        tracker
            .attach_delivered_store(Box::new(delivered_store.clone()))
            .unwrap();
        let (mut dispatcher, seen) = recording_dispatcher();

        for event in [
            BinlogEvent::rotate("bin1", 100),
            query(200),
            table_map(250, 50),
            rows(300, 50),
            xid(400),
        ] {
            tracker.handle_event(&event, &mut dispatcher).unwrap();
        }

        assert_eq!(
            resume_store.writes(),
            vec![pos("bin1", 100), pos("bin1", 200), pos("bin1", 200)]
        );
        assert_eq!(
            delivered_store.writes(),
            vec![pos("bin1", 100), pos("bin1", 250)]
        );
        assert_eq!(
            *seen.lock(),
            vec![
                EventKind::Rotate,
                EventKind::Query,
                EventKind::TableMap,
                EventKind::Rows,
                EventKind::Xid
            ]
        );
        assert_eq!(tracker.resume().position(), Some(400));
    }

    #[test]
    fn test_delivered_events_are_suppressed() {
        let resume_store = RecordingStore::starting_at("bin1", 200);
        let delivered_store = RecordingStore::starting_at("bin1", 250);
        let mut tracker = CheckpointTracker::new();
        tracker
            .attach_resume_store(Box::new(resume_store.clone()))
            .unwrap();
        tracker
            .attach_delivered_store(Box::new(delivered_store.clone()))
            .unwrap();
        let (mut dispatcher, seen) = recording_dispatcher();

        // 서버는 덤프 시작 시 같은 파일명의 rotate를 먼저 보냄
        for event in [
            BinlogEvent::rotate("bin1", 200),
            table_map(250, 50),
            rows(300, 50),
            xid(400),
        ] {
            tracker.handle_event(&event, &mut dispatcher).unwrap();
        }

        assert_eq!(*seen.lock(), vec![EventKind::Rotate, EventKind::Xid]);
        assert!(resume_store.writes().is_empty());
        assert!(delivered_store.writes().is_empty());
    }

    #[test]
    fn test_skipped_query_still_moves_resume() {
        let resume_store = RecordingStore::starting_at("bin1", 100);
        let delivered_store = RecordingStore::starting_at("bin1", 500);
        let mut tracker = CheckpointTracker::new();
        tracker
            .attach_resume_store(Box::new(resume_store.clone()))
            .unwrap();
        tracker
            .attach_delivered_store(Box::new(delivered_store))
            .unwrap();
        let (mut dispatcher, seen) = recording_dispatcher();

        tracker.handle_event(&query(200), &mut dispatcher).unwrap();

        assert!(seen.lock().is_empty());
        assert_eq!(resume_store.writes(), vec![pos("bin1", 200)]);
    }

    #[test]
    fn test_unknown_event_leaves_checkpoints() {
        let mut tracker = CheckpointTracker::new();
        let (mut dispatcher, seen) = recording_dispatcher();
        tracker
            .handle_event(&BinlogEvent::rotate("bin1", 100), &mut dispatcher)
            .unwrap();

        let unknown = BinlogEvent::new(
            EventHeader::new(900, 10),
            BinlogEventData::Unknown(RawEventData { type_code: 250 }),
        );
        tracker.handle_event(&unknown, &mut dispatcher).unwrap();

        assert_eq!(tracker.resume().to_position(), Some(pos("bin1", 100)));
        assert_eq!(*seen.lock(), vec![EventKind::Rotate]);
    }

    #[test]
    fn test_metadata_events_fire_without_writes() {
        let resume_store = RecordingStore::default();
        let delivered_store = RecordingStore::default();
        let mut tracker = CheckpointTracker::new();
        tracker
            .attach_resume_store(Box::new(resume_store.clone()))
            .unwrap();
        tracker
            .attach_delivered_store(Box::new(delivered_store.clone()))
            .unwrap();
        let (mut dispatcher, seen) = recording_dispatcher();

        tracker
            .handle_event(&BinlogEvent::rotate("bin1", 100), &mut dispatcher)
            .unwrap();
        tracker.handle_event(&xid(400), &mut dispatcher).unwrap();
        assert_eq!(tracker.resume().position(), Some(400));

        // FORMAT_DESCRIPTION은 0을 보고하므로 resume이 뒤로 가면 안 됨
        let format = BinlogEvent::new(
            EventHeader::new(0, 120),
            BinlogEventData::FormatDescription(FormatDescriptionData {
                binlog_version: 4,
                server_version: "8.0.36".into(),
            }),
        );
        tracker.handle_event(&format, &mut dispatcher).unwrap();
        assert_eq!(tracker.resume().position(), Some(400));
        assert!(!tracker.is_overflowed());

        for event in [
            BinlogEvent::new(
                EventHeader::new(430, 30),
                BinlogEventData::IntVar(IntVarData { var_type: 2, value: 17 }),
            ),
            BinlogEvent::new(
                EventHeader::new(460, 30),
                BinlogEventData::UserVar(UserVarData {
                    name: "batch".into(),
                    value: None,
                }),
            ),
            BinlogEvent::new(
                EventHeader::new(490, 30),
                BinlogEventData::Incident(IncidentData {
                    incident: 1,
                    message: "lost events".into(),
                }),
            ),
            BinlogEvent::new(
                EventHeader::new(520, 30),
                BinlogEventData::Unimplemented(RawEventData { type_code: 29 }),
            ),
        ] {
            tracker.handle_event(&event, &mut dispatcher).unwrap();
        }

        assert_eq!(
            *seen.lock(),
            vec![
                EventKind::Rotate,
                EventKind::Xid,
                EventKind::FormatDescription,
                EventKind::IntVar,
                EventKind::UserVar,
                EventKind::Incident,
                EventKind::Unimplemented
            ]
        );
        assert_eq!(tracker.resume().to_position(), Some(pos("bin1", 520)));
        assert_eq!(resume_store.writes(), vec![pos("bin1", 100)]);
        assert!(delivered_store.writes().is_empty());
    }

    #[test]
    fn test_out_of_range_position_is_rejected() {
        let store = RecordingStore::default();
        let mut tracker = CheckpointTracker::new();
        tracker.attach_resume_store(Box::new(store.clone())).unwrap();
        let (mut dispatcher, seen) = recording_dispatcher();

        tracker
            .handle_event(&BinlogEvent::rotate("bin1", u64::MAX - 10), &mut dispatcher)
            .unwrap();
        let err = tracker
            .handle_event(&rows(5, u32::MAX), &mut dispatcher)
            .unwrap_err();

        assert!(matches!(err, CdcError::InvalidEvent(_)));
        assert_eq!(*seen.lock(), vec![EventKind::Rotate]);
        assert_eq!(store.writes(), vec![pos("bin1", u64::MAX - 10)]);
        assert_eq!(tracker.resume().position(), Some(u64::MAX - 10));
    }

    #[test]
    fn test_prepare_reconnect_rewinds_to_stored() {
        let store = RecordingStore::default();
        let mut tracker = CheckpointTracker::new();
        tracker.attach_resume_store(Box::new(store.clone())).unwrap();
        let (mut dispatcher, _) = recording_dispatcher();

        tracker
            .handle_event(&BinlogEvent::rotate("bin1", 100), &mut dispatcher)
            .unwrap();
        tracker.handle_event(&xid(400), &mut dispatcher).unwrap();
        assert_eq!(tracker.resume().position(), Some(400));

        tracker.prepare_reconnect().unwrap();
        assert_eq!(tracker.resume().to_position(), Some(pos("bin1", 100)));
    }
}
