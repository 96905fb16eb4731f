//! 변경 로그 컨슈머
//!
//! 고정 주기마다 `idle → scanning → forwarding → deleting → idle` 한 바퀴를 돈다.
//! 행은 분배기 채널이 이벤트를 받은 뒤에만 삭제된다. 삭제가 실패하면 다음 틱에
//! 같은 행을 다시 읽으므로 중복 전달은 있을 수 있지만 유실은 없다.

use crate::changelog::ChangeLog;
use crate::distributor::EventSender;
use crate::error::{CdcError, Result};
use crate::events::ChangeEvent;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

pub struct LogConsumer {
    log: ChangeLog,
    tx: EventSender,
    interval: Duration,
    batch_size: usize,
}

impl LogConsumer {
    pub fn new(log: ChangeLog, tx: EventSender, interval: Duration, batch_size: usize) -> Self {
        LogConsumer {
            log,
            tx,
            interval,
            batch_size,
        }
    }

    /// 한 틱 처리. 전달한 이벤트 수를 반환한다.
    pub fn poll_once(&self) -> Result<usize> {
        // scanning
        let batch = self.log.fetch_batch(self.batch_size)?;
        if batch.is_empty() {
            return Ok(0);
        }

        let ids = batch.ids();
        let count = batch.rows.len();

        // forwarding (id 오름차순)
        for row in batch.rows {
            self.tx
                .send(ChangeEvent::from(row))
                .map_err(|_| CdcError::ChannelClosed)?;
        }

        // deleting
        self.log.delete(&ids)?;

        debug!("Forwarded {} changes, deleted {} log rows", count, ids.len());
        Ok(count)
    }

    /// 종료 신호가 올 때까지 주기적으로 폴링
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Log consumer started (interval {:?}, batch {})",
            self.interval, self.batch_size
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once() {
                        error!("Error polling changes: {}", e);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("Log consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SqliteConnection;
    use crate::distributor;
    use crate::events::OperationType;
    use crate::trigger::{PayloadMode, TriggerInstaller};
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn setup() -> (SqliteConnection, ChangeLog) {
        let db = SqliteConnection::open_in_memory().unwrap();
        let log = ChangeLog::new(db.clone());
        log.ensure_table().unwrap();
        db.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        TriggerInstaller::new(db.clone(), PayloadMode::RowId)
            .install_all()
            .unwrap();
        (db, log)
    }

    #[test]
    fn test_poll_once_forwards_in_order_then_deletes() {
        let (db, log) = setup();
        db.execute_batch(
            "INSERT INTO users (name) VALUES ('a');
             INSERT INTO users (name) VALUES ('b');
             UPDATE users SET name = 'c' WHERE id = 1;
             DELETE FROM users WHERE id = 2;",
        )
        .unwrap();

        let (tx, mut rx) = distributor::channel();
        let consumer = LogConsumer::new(log.clone(), tx, Duration::from_secs(1), 100);

        assert_eq!(consumer.poll_once().unwrap(), 4);
        assert!(log.is_empty().unwrap());

        let mut received = Vec::new();
        while let Ok(event) = rx.try_recv() {
            received.push((event.event, event.data));
        }
        assert_eq!(
            received,
            vec![
                (OperationType::Insert, json!({ "id": 1 })),
                (OperationType::Insert, json!({ "id": 2 })),
                (OperationType::Update, json!({ "id": 1 })),
                (OperationType::Delete, json!({ "id": 2 })),
            ]
        );
    }

    #[test]
    fn test_poll_once_respects_batch_size() {
        let (db, log) = setup();
        for _ in 0..5 {
            db.execute_batch("INSERT INTO users (name) VALUES ('x')").unwrap();
        }

        let (tx, _rx) = distributor::channel();
        let consumer = LogConsumer::new(log.clone(), tx, Duration::from_secs(1), 2);

        assert_eq!(consumer.poll_once().unwrap(), 2);
        assert_eq!(log.len().unwrap(), 3);
        assert_eq!(consumer.poll_once().unwrap(), 2);
        assert_eq!(consumer.poll_once().unwrap(), 1);
        assert_eq!(consumer.poll_once().unwrap(), 0);
    }

    #[test]
    fn test_rows_kept_when_handoff_fails() {
        let (db, log) = setup();
        db.execute_batch("INSERT INTO users (name) VALUES ('x')").unwrap();

        let (tx, rx) = distributor::channel();
        drop(rx);
        let consumer = LogConsumer::new(log.clone(), tx, Duration::from_secs(1), 100);

        assert_err!(consumer.poll_once());
        assert_eq!(log.len().unwrap(), 1);
    }

    #[test]
    fn test_numeric_payload_drains() {
        let (db, log) = setup();
        db.execute_batch(
            "INSERT INTO _changes (collection, event, data) VALUES ('users', 'INSERT', '42');
             INSERT INTO _changes (collection, event, data) VALUES ('users', 'INSERT', '{\"id\":2}');",
        )
        .unwrap();

        let (tx, mut rx) = distributor::channel();
        let consumer = LogConsumer::new(log.clone(), tx, Duration::from_secs(1), 100);

        assert_eq!(consumer.poll_once().unwrap(), 2);
        assert!(log.is_empty().unwrap());
        assert_eq!(rx.try_recv().unwrap().data, json!(42));
        assert_eq!(rx.try_recv().unwrap().data, json!({ "id": 2 }));
    }

    #[test]
    fn test_scan_failure_is_reported() {
        let (db, log) = setup();
        let (tx, _rx) = distributor::channel();
        let consumer = LogConsumer::new(log, tx, Duration::from_secs(1), 100);

        assert_ok!(consumer.poll_once());
        db.execute_batch("DROP TABLE _changes").unwrap();
        assert_err!(consumer.poll_once());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (db, log) = setup();
        db.execute_batch("INSERT INTO users (name) VALUES ('x')").unwrap();

        let (tx, mut rx) = distributor::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let consumer = LogConsumer::new(log.clone(), tx, Duration::from_millis(10), 100);
        let handle = tokio::spawn(consumer.run(shutdown_rx));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.collection, "users");

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }
}
