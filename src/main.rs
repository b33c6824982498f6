/// Binlog CDC 소비자 실행 예제
///
/// JSON lines 형식으로 기록된 binlog 이벤트 파일을 재생하면서 콜백으로 출력합니다.
/// 위치 파일을 지정하면 재실행 시 이미 전달한 이벤트는 건너뜁니다.
///
/// 사용법:
/// ```text
/// CDC_POSITION_FILE=position.log \
/// CDC_DELIVERED_POSITION_FILE=delivered_position.log \
/// binlog_cdc events.jsonl
/// ```
use binlog_cdc::events::{BinlogEventData, CellValue};
use binlog_cdc::{
    CdcConfig, CdcEngine, ConnectionConfig, Connector, ReplayClient, ReplicationClient,
};
use std::env;
use std::path::PathBuf;
use tracing::{debug, error, info};

fn format_cells(cells: &[CellValue]) -> String {
    cells
        .iter()
        .map(|cell| cell.as_string().unwrap_or_else(|| "<binary>".to_string()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CdcConfig::from_env()?;

    // 로깅 초기화
    tracing_subscriber::fmt()
        .with_max_level(config.log_level.as_tracing_level())
        .init();

    let events_file = env::args()
        .nth(1)
        .or_else(|| env::var("CDC_REPLAY_FILE").ok())
        .map(PathBuf::from)
        .ok_or("usage: binlog_cdc <events.jsonl> (or set CDC_REPLAY_FILE)")?;

    info!("Starting binlog CDC consumer");
    info!("Source: {}", config.connection.redacted_url());
    info!("Replay file: {}", events_file.display());

    // 재생 클라이언트는 서버에 접속하지 않으므로 연결 설정은 로그에만 남김
    let connector: Connector =
        Box::new(move |connection: &ConnectionConfig| -> Box<dyn ReplicationClient> {
            debug!("Replaying {} in place of {}", events_file.display(), connection.redacted_url());
            Box::new(ReplayClient::new(&events_file))
        });
    let mut engine = CdcEngine::from_config(&config, connector)?;

    engine.on_rotate_event(|event| {
        if let BinlogEventData::Rotate(rotate) = &event.data {
            info!("rotate: {} {}", rotate.next_binlog_name, rotate.position);
        }
        Ok(())
    });
    engine.on_query_event(|event| {
        if let BinlogEventData::Query(query) = &event.data {
            info!("query: [{}] {}", query.database, query.query);
        }
        Ok(())
    });
    engine.on_table_map_event(|event| {
        if let BinlogEventData::TableMap(table_map) = &event.data {
            info!("table_map: {}.{}", table_map.database, table_map.table);
        }
        Ok(())
    });
    engine.on_row_event(|event| {
        if let BinlogEventData::Rows(rows) = &event.data {
            for row in &rows.rows {
                let before = row.before.as_deref().map(format_cells);
                let after = row.after.as_deref().map(format_cells);
                info!(
                    "{} table_id={} before={:?} after={:?}",
                    rows.op.as_str(),
                    rows.table_id,
                    before,
                    after
                );
            }
        }
        Ok(())
    });
    engine.on_xid(|event| {
        if let BinlogEventData::Xid(xid) = &event.data {
            info!("commit: xid={}", xid.xid);
        }
        Ok(())
    });

    let _signals = engine.gracefully_stop_on_signals();

    if let Err(e) = engine.start().await {
        error!(
            "CDC consumer failed after {} retries: {}",
            engine.connection_retry_count(),
            e
        );
        return Err(e.into());
    }

    if let Some(position) = engine.checkpoints().resume().to_position() {
        info!("Resume position: {}", position);
    }
    Ok(())
}
