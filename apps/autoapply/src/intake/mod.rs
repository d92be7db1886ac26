//! Redis list consumer that turns queued JSON messages into pending applications.
//!
//! Intake only creates records. They are picked up by the next processing run.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use redis::aio::MultiplexedConnection;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::NewApplication;
use crate::pipeline::{ApplicationStore, StoreError};

/// Seconds a single BLPOP blocks before looping.
const POLL_TIMEOUT_SECS: u64 = 5;
const BACKOFF: Duration = Duration::from_secs(5);

/// What intake did with one message.
#[derive(Debug)]
pub enum IntakeDecision {
    Created(Uuid),
    /// Same `(job_url, email)` already queued; acknowledged and dropped.
    Duplicate,
    /// Unparseable or invalid; goes to the dead-letter list.
    Rejected(String),
    /// Store unavailable; the message is requeued.
    Requeue(StoreError),
}

/// Parses and validates a queued message.
pub fn parse_message(payload: &str) -> Result<NewApplication, String> {
    let new: NewApplication =
        serde_json::from_str(payload).map_err(|e| format!("invalid JSON payload: {e}"))?;
    new.validate()?;
    Ok(new)
}

pub async fn process_message(store: &dyn ApplicationStore, payload: &str) -> IntakeDecision {
    let new = match parse_message(payload) {
        Ok(new) => new,
        Err(reason) => return IntakeDecision::Rejected(reason),
    };
    match store.create_application(&new).await {
        Ok(row) => IntakeDecision::Created(row.id),
        Err(StoreError::Duplicate { .. }) => IntakeDecision::Duplicate,
        Err(e) => IntakeDecision::Requeue(e),
    }
}

pub struct QueueIntake {
    client: redis::Client,
    queue: String,
    dead_letter: String,
    store: Arc<dyn ApplicationStore>,
}

impl QueueIntake {
    pub fn new(redis_url: &str, queue: String, store: Arc<dyn ApplicationStore>) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let dead_letter = format!("{queue}:dead");
        Ok(Self {
            client,
            queue,
            dead_letter,
            store,
        })
    }

    /// Consumes the queue forever, reconnecting after Redis failures.
    pub async fn run(self) {
        info!("Queue intake consuming '{}'", self.queue);
        loop {
            let mut conn = match self.client.get_multiplexed_tokio_connection().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Queue intake cannot reach Redis: {e}");
                    tokio::time::sleep(BACKOFF).await;
                    continue;
                }
            };
            if let Err(e) = self.consume(&mut conn).await {
                warn!("Queue intake connection dropped: {e}");
                tokio::time::sleep(BACKOFF).await;
            }
        }
    }

    async fn consume(&self, conn: &mut MultiplexedConnection) -> redis::RedisResult<()> {
        loop {
            let popped: Option<(String, String)> = redis::cmd("BLPOP")
                .arg(&self.queue)
                .arg(POLL_TIMEOUT_SECS)
                .query_async(conn)
                .await?;
            let Some((_, payload)) = popped else {
                continue;
            };

            match process_message(self.store.as_ref(), &payload).await {
                IntakeDecision::Created(id) => {
                    info!(application_id = %id, "Queued application created");
                }
                IntakeDecision::Duplicate => {
                    info!("Dropped duplicate queued application");
                }
                IntakeDecision::Rejected(reason) => {
                    warn!("Queued message rejected: {reason}");
                    let entry = json!({
                        "payload": payload,
                        "error": reason,
                        "rejected_at": Utc::now(),
                    });
                    redis::cmd("RPUSH")
                        .arg(&self.dead_letter)
                        .arg(entry.to_string())
                        .query_async::<_, i64>(conn)
                        .await?;
                }
                IntakeDecision::Requeue(e) => {
                    error!("Queued message could not be stored, requeueing: {e}");
                    redis::cmd("LPUSH")
                        .arg(&self.queue)
                        .arg(&payload)
                        .query_async::<_, i64>(conn)
                        .await?;
                    tokio::time::sleep(BACKOFF).await;
                }
            }
        }
    }
}
