//! SQLite-backed queue transport on the shared [`Database`].

use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use super::{validate_queue_name, QueueMessage, QueueTransport};
use crate::db::{Database, DatabaseError};
use crate::error::QueueError;

/// Durable queues in the `queue_messages` table. Leasing hides a message by
/// pushing its `visible_at` (epoch millis) into the future.
#[derive(Clone)]
pub struct SqliteQueue {
    db: Database,
}

impl SqliteQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Explains why a receipt-guarded update touched no row.
    fn missing_or_stale(&self, queue: &str, message: &QueueMessage) -> QueueError {
        let exists = self.db.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM queue_messages WHERE queue = ?1 AND id = ?2",
                    params![queue, message.id],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        });

        match exists {
            Ok(true) => QueueError::ReceiptMismatch {
                message_id: message.id.clone(),
            },
            Ok(false) => QueueError::MessageNotFound {
                queue: queue.to_string(),
                message_id: message.id.clone(),
            },
            Err(e) => QueueError::Backend(e),
        }
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn lease_until(lease: Duration) -> i64 {
    now_millis().saturating_add(i64::try_from(lease.as_millis()).unwrap_or(i64::MAX))
}

impl QueueTransport for SqliteQueue {
    fn ensure_queue(&self, queue: &str) -> Result<(), QueueError> {
        validate_queue_name(queue)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO queues (name, created_at) VALUES (?1, ?2)",
                params![queue, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    fn send(&self, queue: &str, body: &str) -> Result<String, QueueError> {
        self.ensure_queue(queue)?;
        let id = uuid::Uuid::new_v4().to_string();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO queue_messages (id, queue, body, dequeue_count, visible_at, inserted_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?5)",
                params![id, queue, body, now_millis(), Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })?;
        log::debug!("Sent message {} to {}", id, queue);
        Ok(id)
    }

    fn receive(&self, queue: &str, lease: Duration) -> Result<Option<QueueMessage>, QueueError> {
        let message = self.db.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let row = tx
                .query_row(
                    "SELECT id, body, dequeue_count, inserted_at FROM queue_messages
                     WHERE queue = ?1 AND visible_at <= ?2
                     ORDER BY seq LIMIT 1",
                    params![queue, now_millis()],
                    |r| {
                        Ok((
                            r.get::<_, String>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, u32>(2)?,
                            r.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;

            let Some((id, body, dequeue_count, inserted_at)) = row else {
                return Ok(None);
            };

            let pop_receipt = uuid::Uuid::new_v4().to_string();
            let dequeue_count = dequeue_count + 1;
            tx.execute(
                "UPDATE queue_messages SET dequeue_count = ?2, pop_receipt = ?3, visible_at = ?4
                 WHERE id = ?1",
                params![id, dequeue_count, pop_receipt, lease_until(lease)],
            )?;
            tx.commit()?;

            Ok::<_, DatabaseError>(Some(QueueMessage {
                id,
                body,
                dequeue_count,
                pop_receipt,
                inserted_at,
            }))
        })?;
        Ok(message)
    }

    fn delete(&self, queue: &str, message: &QueueMessage) -> Result<(), QueueError> {
        let deleted = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM queue_messages WHERE queue = ?1 AND id = ?2 AND pop_receipt = ?3",
                params![queue, message.id, message.pop_receipt],
            )?)
        })?;

        if deleted == 0 {
            return Err(self.missing_or_stale(queue, message));
        }
        Ok(())
    }

    fn extend_lease(
        &self,
        queue: &str,
        message: &QueueMessage,
        lease: Duration,
    ) -> Result<QueueMessage, QueueError> {
        let pop_receipt = uuid::Uuid::new_v4().to_string();
        let updated = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE queue_messages SET visible_at = ?4, pop_receipt = ?5
                 WHERE queue = ?1 AND id = ?2 AND pop_receipt = ?3",
                params![
                    queue,
                    message.id,
                    message.pop_receipt,
                    lease_until(lease),
                    pop_receipt
                ],
            )?)
        })?;

        if updated == 0 {
            return Err(self.missing_or_stale(queue, message));
        }
        Ok(QueueMessage {
            pop_receipt,
            ..message.clone()
        })
    }

    fn peek_count(&self, queue: &str) -> Result<u64, QueueError> {
        let count = self.db.with_conn(|conn| {
            let count: u64 = conn.query_row(
                "SELECT COUNT(*) FROM queue_messages WHERE queue = ?1 AND visible_at <= ?2",
                params![queue, now_millis()],
                |r| r.get(0),
            )?;
            Ok(count)
        })?;
        Ok(count)
    }

    fn approximate_count(&self, queue: &str) -> Result<u64, QueueError> {
        let count = self.db.with_conn(|conn| {
            let count: u64 = conn.query_row(
                "SELECT COUNT(*) FROM queue_messages WHERE queue = ?1",
                params![queue],
                |r| r.get(0),
            )?;
            Ok(count)
        })?;
        Ok(count)
    }
}
