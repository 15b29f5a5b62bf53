//! Durable queue on a PostgreSQL table
//!
//! Messages live in `pipeline_messages`. Consumers claim the oldest message on
//! a topic with `FOR UPDATE SKIP LOCKED`, so competing consumers never block
//! each other. A claim older than the visibility timeout is treated as
//! abandoned and the message becomes deliverable again.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;

use super::{Delivery, Transport};
use crate::error::TransportError;

/// Default sleep when a topic is empty
pub const DEFAULT_QUEUE_POLL: Duration = Duration::from_millis(500);

/// Default time before an unacknowledged claim is released
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);

pub struct PgQueueTransport {
    pool: PgPool,
    poll_interval: Duration,
    visibility_timeout: Duration,
}

impl PgQueueTransport {
    pub fn new(pool: PgPool, poll_interval: Duration, visibility_timeout: Duration) -> Self {
        Self {
            pool,
            poll_interval,
            visibility_timeout,
        }
    }

    /// Messages on `topic` not yet acknowledged
    pub async fn depth(&self, topic: &str) -> Result<i64, TransportError> {
        let depth: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pipeline_messages WHERE topic = $1")
            .bind(topic)
            .fetch_one(&self.pool)
            .await?;
        Ok(depth)
    }
}

#[async_trait]
impl Transport for PgQueueTransport {
    async fn receive(&self, topic: &str) -> Result<Option<Delivery>, TransportError> {
        let claimed: Option<(i64, String, Vec<u8>)> = sqlx::query_as(
            r#"
            UPDATE pipeline_messages
            SET claimed_at = now(), attempts = attempts + 1
            WHERE id = (
                SELECT id FROM pipeline_messages
                WHERE topic = $1
                  AND (claimed_at IS NULL OR claimed_at < now() - make_interval(secs => $2))
                ORDER BY id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, topic, payload
            "#,
        )
        .bind(topic)
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        match claimed {
            Some((id, topic, payload)) => Ok(Some(Delivery { id, topic, payload })),
            None => {
                tokio::time::sleep(self.poll_interval).await;
                Ok(None)
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        sqlx::query("DELETE FROM pipeline_messages WHERE id = $1")
            .bind(delivery.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        sqlx::query("INSERT INTO pipeline_messages (topic, payload) VALUES ($1, $2)")
            .bind(topic)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
