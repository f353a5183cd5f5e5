//! Durable event transport. `Event`s land on `exchange:events`, the
//! settlement consumer reads them as `clearing-group`, and a message that
//! keeps failing ends up on `exchange:events:dlq` rather than looping
//! forever. Abstracted behind a trait so the consumer's retry/claim/DLQ
//! logic can be tested without a running Redis.

use crate::errors::{CoreError, ErrorKind};
use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub id: String,
    pub payload: String,
    /// Prior delivery attempts. Populated from `XPENDING` when a message is
    /// reclaimed off another consumer's PEL; a message seen for the first
    /// time through `read_group` hasn't been retried yet, so it's `0`.
    pub delivery_count: i64,
}

#[async_trait]
pub trait EventStream: Send + Sync {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), CoreError>;
    async fn publish(&self, stream: &str, payload: &str) -> Result<String, CoreError>;
    async fn read_group(&self, stream: &str, group: &str, consumer: &str, count: usize) -> Result<Vec<StreamMessage>, CoreError>;
    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), CoreError>;
    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: i64,
        count: usize,
    ) -> Result<Vec<StreamMessage>, CoreError>;
    async fn pending_depth(&self, stream: &str, group: &str) -> Result<u64, CoreError>;
    async fn move_to_dlq(&self, stream: &str, group: &str, consumer: &str, message: &StreamMessage, reason: &str) -> Result<(), CoreError>;
}

pub struct RedisEventStream {
    conn: ConnectionManager,
}

impl RedisEventStream {
    pub async fn connect(redis_url: &str) -> Result<Self, CoreError> {
        let client = redis::Client::open(redis_url).map_err(|e| CoreError::new(ErrorKind::Internal, e.to_string()))?;
        let conn = ConnectionManager::new(client).await.map_err(|e| CoreError::new(ErrorKind::Internal, e.to_string()))?;
        Ok(Self { conn })
    }

    fn dlq_name(stream: &str) -> String {
        format!("{stream}:dlq")
    }
}

#[async_trait]
impl EventStream for RedisEventStream {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(()),
            // BUSYGROUP means the group already exists — not an error here.
            Err(err) if err.to_string().contains("BUSYGROUP") => Ok(()),
            Err(err) => Err(CoreError::new(ErrorKind::Internal, err.to_string())),
        }
    }

    async fn publish(&self, stream: &str, payload: &str) -> Result<String, CoreError> {
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd(stream, "*", &[("data", payload)])
            .await
            .map_err(|e| CoreError::new(ErrorKind::Internal, e.to_string()))?;
        Ok(id)
    }

    async fn read_group(&self, stream: &str, group: &str, consumer: &str, count: usize) -> Result<Vec<StreamMessage>, CoreError> {
        let mut conn = self.conn.clone();
        let opts = redis::streams::StreamReadOptions::default().group(group, consumer).count(count);
        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&[stream], &[">"], &opts)
            .await
            .map_err(|e| CoreError::new(ErrorKind::Internal, e.to_string()))?;

        Ok(flatten_reply(reply))
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(stream, group, &[id]).await.map_err(|e| CoreError::new(ErrorKind::Internal, e.to_string()))?;
        Ok(())
    }

    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: i64,
        count: usize,
    ) -> Result<Vec<StreamMessage>, CoreError> {
        let mut conn = self.conn.clone();

        // Extended XPENDING over the same idle window gives us the
        // per-message delivery count the plain XCLAIM reply doesn't carry.
        let pending: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::new(ErrorKind::Internal, e.to_string()))?;
        let delivery_counts: HashMap<String, i64> =
            pending.ids.into_iter().map(|entry| (entry.id, entry.times_delivered as i64)).collect();

        let reply: redis::streams::StreamClaimReply = redis::cmd("XCLAIM")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::new(ErrorKind::Internal, e.to_string()))?;

        Ok(reply
            .ids
            .into_iter()
            .map(|entry| {
                let delivery_count = delivery_counts.get(&entry.id).copied().unwrap_or(0);
                StreamMessage { id: entry.id, payload: extract_payload(&entry.map), delivery_count }
            })
            .collect())
    }

    async fn pending_depth(&self, stream: &str, group: &str) -> Result<u64, CoreError> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamPendingReply = conn
            .xpending(stream, group)
            .await
            .map_err(|e| CoreError::new(ErrorKind::Internal, e.to_string()))?;
        match reply {
            redis::streams::StreamPendingReply::Empty => Ok(0),
            redis::streams::StreamPendingReply::Data(data) => Ok(data.count as u64),
        }
    }

    async fn move_to_dlq(&self, stream: &str, group: &str, consumer: &str, message: &StreamMessage, reason: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let dlq_payload = serde_json::json!({
            "msgId": message.id,
            "reason": reason,
            "data": message.payload,
            "tsMs": Utc::now().timestamp_millis(),
            "group": group,
            "consumer": consumer,
        })
        .to_string();

        let _: String = conn
            .xadd(Self::dlq_name(stream), "*", &[("data", dlq_payload.as_str())])
            .await
            .map_err(|e| CoreError::new(ErrorKind::Internal, e.to_string()))?;

        self.ack(stream, group, &message.id).await
    }
}

fn flatten_reply(reply: redis::streams::StreamReadReply) -> Vec<StreamMessage> {
    reply
        .keys
        .into_iter()
        .flat_map(|key| key.ids)
        .map(|entry| StreamMessage { id: entry.id, payload: extract_payload(&entry.map), delivery_count: 0 })
        .collect()
}

fn extract_payload(map: &HashMap<String, redis::Value>) -> String {
    map.get("data")
        .and_then(|v| match v {
            redis::Value::Data(bytes) => String::from_utf8(bytes.clone()).ok(),
            redis::Value::Status(s) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlq_name_is_suffixed() {
        assert_eq!(RedisEventStream::dlq_name("exchange:events"), "exchange:events:dlq");
    }
}
