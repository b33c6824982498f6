//! MySQL CDC 엔진 - 연결, 위치 이동, 이벤트 처리, 재연결
//!
//! 이벤트 처리 순서:
//! 1. 외부 클라이언트에서 이벤트 하나를 받음
//! 2. 체크포인트 기준으로 전달 여부 판단 후 콜백 호출
//! 3. 체크포인트를 동기적으로 저장
//! 4. 중단 요청 확인 후 다음 이벤트로
//!
//! 이벤트는 한 번에 하나씩만 처리되며, 중단 요청은 이벤트 경계에서만 반영됩니다.

use crate::checkpoint::CheckpointTracker;
use crate::client::{Connector, ReplicationClient};
use crate::config::{CdcConfig, ConnectionConfig};
use crate::dispatcher::EventDispatcher;
use crate::error::{CdcError, Result};
use crate::events::{BinlogEvent, EventKind};
use crate::offset::{PositionFile, PositionStore, ProcessingState};
use crate::retry::RetryPolicy;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct StopState {
    requested: AtomicBool,
    /// 이벤트 처리 중이면 true
    busy: AtomicBool,
    notify: Notify,
}

/// 엔진 중단 요청 핸들
///
/// 콜백 안이나 시그널 처리 태스크에서 복제해서 사용합니다.
/// 대기 중이면 즉시 멈추고, 이벤트 처리 중이면 그 이벤트가 끝난 뒤 멈춥니다.
#[derive(Clone, Default)]
pub struct StopHandle {
    inner: Arc<StopState>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// 진행 중인 이벤트 처리가 없는지 여부
    pub fn is_safe_to_stop(&self) -> bool {
        !self.inner.busy.load(Ordering::SeqCst)
    }

    fn set_busy(&self, busy: bool) {
        self.inner.busy.store(busy, Ordering::SeqCst);
    }

    /// 중단 요청이 들어올 때까지 대기
    async fn stopped(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_stop_requested() {
                return;
            }
            notified.await;
        }
    }
}

/// MySQL CDC 엔진
pub struct CdcEngine {
    connector: Connector,
    connection: ConnectionConfig,
    tracker: CheckpointTracker,
    dispatcher: EventDispatcher,
    retry: RetryPolicy,
    stop: StopHandle,
    state: ProcessingState,
}

impl CdcEngine {
    /// 새 CDC 엔진 생성. `connector`는 연결 시도마다 새 클라이언트를 만듦
    pub fn new(connector: Connector) -> Self {
        CdcEngine {
            connector,
            connection: ConnectionConfig::default(),
            tracker: CheckpointTracker::new(),
            dispatcher: EventDispatcher::new(),
            retry: RetryPolicy::default(),
            stop: StopHandle::default(),
            state: ProcessingState::Disconnected,
        }
    }

    /// 설정을 적용한 엔진 생성. 위치 파일이 있으면 여기서 읽어옴
    pub fn from_config(config: &CdcConfig, connector: Connector) -> Result<Self> {
        let mut engine = CdcEngine::new(connector);
        engine.set_connection(config.connection.clone());
        if let Some(path) = &config.position_file {
            engine.set_position_file(path)?;
        }
        if let Some(path) = &config.delivered_position_file {
            engine.set_delivered_position_file(path)?;
        }
        engine.set_connection_retry_limit(config.retry_limit);
        engine.set_connection_retry_wait(config.retry_wait);
        Ok(engine)
    }

    /// 다음 연결 시도부터 connector에 전달할 연결 설정
    pub fn set_connection(&mut self, connection: ConnectionConfig) {
        self.connection = connection;
    }

    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }

    pub fn set_position_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.set_position_store(Box::new(PositionFile::open(path)?))
    }

    /// 지정하지 않으면 재시작 시 중복 제거 없이 모든 이벤트를 전달
    pub fn set_delivered_position_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.set_delivered_position_store(Box::new(PositionFile::open(path)?))
    }

    pub fn set_position_store(&mut self, store: Box<dyn PositionStore>) -> Result<()> {
        self.tracker.attach_resume_store(store)
    }

    pub fn set_delivered_position_store(&mut self, store: Box<dyn PositionStore>) -> Result<()> {
        self.tracker.attach_delivered_store(store)
    }

    pub fn set_connection_retry_limit(&mut self, limit: u32) {
        self.retry.limit = limit;
    }

    pub fn set_connection_retry_wait(&mut self, wait: Duration) {
        self.retry.wait = wait;
    }

    /// 마지막 `start` 이후 재시도 횟수
    pub fn connection_retry_count(&self) -> u32 {
        self.retry.count
    }

    pub fn checkpoints(&self) -> &CheckpointTracker {
        &self.tracker
    }

    pub fn state(&self) -> ProcessingState {
        self.state
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    pub fn is_safe_to_stop(&self) -> bool {
        self.stop.is_safe_to_stop()
    }

    fn register<F>(&mut self, kind: EventKind, callback: F)
    where
        F: FnMut(&BinlogEvent) -> Result<()> + Send + 'static,
    {
        self.dispatcher.register(kind, Box::new(callback));
    }

    pub fn on_query_event<F>(&mut self, callback: F)
    where
        F: FnMut(&BinlogEvent) -> Result<()> + Send + 'static,
    {
        self.register(EventKind::Query, callback);
    }

    /// 로테이션 콜백은 이미 전달된 구간에서도 항상 호출됨
    pub fn on_rotate_event<F>(&mut self, callback: F)
    where
        F: FnMut(&BinlogEvent) -> Result<()> + Send + 'static,
    {
        self.register(EventKind::Rotate, callback);
    }

    pub fn on_int_var_event<F>(&mut self, callback: F)
    where
        F: FnMut(&BinlogEvent) -> Result<()> + Send + 'static,
    {
        self.register(EventKind::IntVar, callback);
    }

    pub fn on_user_var_event<F>(&mut self, callback: F)
    where
        F: FnMut(&BinlogEvent) -> Result<()> + Send + 'static,
    {
        self.register(EventKind::UserVar, callback);
    }

    pub fn on_format_event<F>(&mut self, callback: F)
    where
        F: FnMut(&BinlogEvent) -> Result<()> + Send + 'static,
    {
        self.register(EventKind::FormatDescription, callback);
    }

    pub fn on_xid<F>(&mut self, callback: F)
    where
        F: FnMut(&BinlogEvent) -> Result<()> + Send + 'static,
    {
        self.register(EventKind::Xid, callback);
    }

    pub fn on_table_map_event<F>(&mut self, callback: F)
    where
        F: FnMut(&BinlogEvent) -> Result<()> + Send + 'static,
    {
        self.register(EventKind::TableMap, callback);
    }

    pub fn on_row_event<F>(&mut self, callback: F)
    where
        F: FnMut(&BinlogEvent) -> Result<()> + Send + 'static,
    {
        self.register(EventKind::Rows, callback);
    }

    pub fn on_incident_event<F>(&mut self, callback: F)
    where
        F: FnMut(&BinlogEvent) -> Result<()> + Send + 'static,
    {
        self.register(EventKind::Incident, callback);
    }

    pub fn on_unimplemented_event<F>(&mut self, callback: F)
    where
        F: FnMut(&BinlogEvent) -> Result<()> + Send + 'static,
    {
        self.register(EventKind::Unimplemented, callback);
    }

    /// Ctrl-C (unix에서는 SIGTERM 포함)를 받으면 중단 요청
    ///
    /// 시그널 태스크는 플래그만 세우고 체크포인트에는 손대지 않습니다.
    pub fn gracefully_stop_on_signals(&self) -> JoinHandle<()> {
        let stop = self.stop.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            if stop.is_safe_to_stop() {
                info!("Shutdown signal received, stopping");
            } else {
                info!("Shutdown signal received, stopping after current event");
            }
            stop.request_stop();
        })
    }

    /// 스트리밍 시작. 스트림이 끝나거나 중단 요청이 들어오면 Ok
    ///
    /// 연결 계열 에러는 재시도 한도까지 마지막 저장 위치에서 다시 시작하고,
    /// 한도를 넘으면 원래 에러를 그대로 반환합니다.
    pub async fn start(&mut self) -> Result<()> {
        self.retry.reset();

        loop {
            debug!("Connecting to {}", self.connection.redacted_url());
            let mut client = (self.connector)(&self.connection);
            let result = self.replicate(client.as_mut()).await;

            let err = match result {
                Ok(()) => {
                    self.state = ProcessingState::Stopped;
                    info!("CDC Engine stopped");
                    return Ok(());
                }
                Err(err) => err,
            };

            self.state = ProcessingState::Disconnected;
            debug!("Replication interrupted: {}", err);

            if err.is_transport()
                && client.is_closed()
                && self.retry.retryable()
                && !self.stop.is_stop_requested()
            {
                warn!(
                    "Connection lost ({}), retrying in {:?} ({}/{})",
                    err,
                    self.retry.wait,
                    self.retry.count + 1,
                    self.retry.limit
                );
                tokio::time::sleep(self.retry.wait).await;
                self.retry.count_up();
                self.tracker.prepare_reconnect()?;
                continue;
            }

            self.state = ProcessingState::Stopped;
            error!(
                "CDC Engine failed after {} retries: {}",
                self.retry.count, err
            );
            return Err(err);
        }
    }

    async fn replicate(&mut self, client: &mut dyn ReplicationClient) -> Result<()> {
        self.state = ProcessingState::Connecting;
        if !client.connect().await? {
            return Err(CdcError::ConnectionError(
                "MySQL server has gone away".to_string(),
            ));
        }

        if let Some(position) = self.tracker.resume().to_position() {
            info!("Resuming binlog streaming from {}", position);
            client
                .set_position(&position.filename, position.position)
                .await?;
        } else {
            info!("No resume position, streaming from the server's default");
        }

        self.state = ProcessingState::Replicating;
        let stop = self.stop.clone();

        loop {
            let next = tokio::select! {
                biased;
                _ = stop.stopped() => {
                    info!("Stop requested while waiting for events");
                    return Ok(());
                }
                next = client.wait_for_next_event() => next,
            };

            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => {
                    info!("Binlog stream ended");
                    return Ok(());
                }
                Err(CdcError::InvalidEvent(reason)) => {
                    warn!("Skipping malformed event: {}", reason);
                    continue;
                }
                Err(err) => return Err(err),
            };

            stop.set_busy(true);
            let result = self.tracker.handle_event(&event, &mut self.dispatcher);
            stop.set_busy(false);
            result?;

            if stop.is_stop_requested() {
                info!("Stop requested, stopping at event boundary");
                return Ok(());
            }
        }
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
