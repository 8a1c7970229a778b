//! Durable pull-based event channel on PostgreSQL.
//!
//! Messages are rows in `channel_messages`. `fetch` claims pending rows with
//! `FOR UPDATE SKIP LOCKED` so concurrent consumers never share a message.
//! A claimed row that is not acked within the ack window becomes eligible
//! again (redelivery). Rows that exhaust `max_deliver` attempts are moved to
//! `dead` instead of being handed out once more.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use tracing::{debug, warn};

use audioml_core::defaults::{CHANNEL_ACK_WAIT_SECS, CHANNEL_MAX_DELIVER};
use audioml_core::{Delivery, Error, EventChannel, Result};

/// Redelivery policy for the channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// How long a claimed message stays invisible before redelivery.
    pub ack_wait: Duration,
    /// Deliveries after which an unacked message is dead-lettered.
    pub max_deliver: i32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ack_wait: Duration::from_secs(CHANNEL_ACK_WAIT_SECS),
            max_deliver: CHANNEL_MAX_DELIVER,
        }
    }
}

impl ChannelConfig {
    /// Read `CHANNEL_ACK_WAIT_SECS` and `CHANNEL_MAX_DELIVER`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = std::env::var("CHANNEL_ACK_WAIT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.ack_wait = Duration::from_secs(secs);
        }
        if let Some(n) = std::env::var("CHANNEL_MAX_DELIVER")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .filter(|n| *n > 0)
        {
            config.max_deliver = n;
        }
        config
    }

    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    pub fn with_max_deliver(mut self, max_deliver: i32) -> Self {
        self.max_deliver = max_deliver;
        self
    }
}

/// PostgreSQL implementation of [`EventChannel`].
#[derive(Clone)]
pub struct PgEventChannel {
    pool: Pool<Postgres>,
    config: ChannelConfig,
    notify: Arc<Notify>,
}

impl PgEventChannel {
    pub fn new(pool: Pool<Postgres>, config: ChannelConfig) -> Self {
        Self {
            pool,
            config,
            notify: Arc::new(Notify::new()),
        }
    }

    fn ack_wait_secs(&self) -> f64 {
        self.config.ack_wait.as_secs_f64()
    }

    /// Move expired in-flight messages that used up their attempts to `dead`.
    async fn dead_letter_exhausted(&self, subject: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE channel_messages
             SET state = 'dead', last_error = 'max deliveries exceeded'
             WHERE subject = $1
               AND state = 'in_flight'
               AND attempts >= $2
               AND claimed_at < now() - make_interval(secs => $3)",
        )
        .bind(subject)
        .bind(self.config.max_deliver)
        .bind(self.ack_wait_secs())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let dead = result.rows_affected();
        if dead > 0 {
            warn!(
                subsystem = "channel",
                subject,
                dead_lettered = dead,
                max_deliver = self.config.max_deliver,
                "Dead-lettered messages that exhausted their deliveries"
            );
        }
        Ok(dead)
    }
}

#[async_trait]
impl EventChannel for PgEventChannel {
    async fn publish(&self, subject: &str, payload: &JsonValue) -> Result<i64> {
        let seq: i64 = sqlx::query_scalar(
            "INSERT INTO channel_messages (subject, payload) VALUES ($1, $2) RETURNING seq",
        )
        .bind(subject)
        .bind(payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Channel(format!("publish to {subject} failed: {e}")))?;

        debug!(subsystem = "channel", subject, seq, "Message published");
        self.notify.notify_waiters();
        Ok(seq)
    }

    async fn fetch(&self, subject: &str, max: usize) -> Result<Vec<Delivery>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        self.dead_letter_exhausted(subject).await?;

        let rows = sqlx::query(
            "WITH claimable AS (
                 SELECT seq FROM channel_messages
                 WHERE subject = $1
                   AND (state = 'pending'
                        OR (state = 'in_flight'
                            AND claimed_at < now() - make_interval(secs => $2)))
                 ORDER BY seq
                 LIMIT $3
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE channel_messages m
             SET state = 'in_flight', attempts = m.attempts + 1, claimed_at = now()
             FROM claimable
             WHERE m.seq = claimable.seq
             RETURNING m.seq, m.subject, m.payload, m.attempts",
        )
        .bind(subject)
        .bind(self.ack_wait_secs())
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut deliveries: Vec<Delivery> = rows
            .into_iter()
            .map(|row| Delivery {
                seq: row.get("seq"),
                subject: row.get("subject"),
                payload: row.get("payload"),
                attempt: row.get("attempts"),
            })
            .collect();
        deliveries.sort_by_key(|d| d.seq);

        if !deliveries.is_empty() {
            debug!(
                subsystem = "channel",
                subject,
                result_count = deliveries.len(),
                "Claimed messages"
            );
        }
        Ok(deliveries)
    }

    async fn ack(&self, seq: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE channel_messages SET state = 'acked', acked_at = now()
             WHERE seq = $1 AND state = 'in_flight'",
        )
        .bind(seq)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            debug!(subsystem = "channel", seq, "Ack for message not in flight ignored");
        }
        Ok(())
    }

    async fn reject(&self, seq: i64, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE channel_messages SET state = 'dead', last_error = $2
             WHERE seq = $1 AND state IN ('pending', 'in_flight')",
        )
        .bind(seq)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        warn!(subsystem = "channel", seq, error = reason, "Message dead-lettered");
        Ok(())
    }

    fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}
