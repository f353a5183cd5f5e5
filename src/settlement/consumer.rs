//! Exactly-one-per-group settlement consumer. Reads `TradeCreated` events
//! off `exchange:events`, turns each into a `SettleTrade` call, and only
//! acks once the call succeeds — an error leaves the message pending so a
//! crashed or stuck consumer's work gets claimed and retried by another.

use super::stream::{EventStream, StreamMessage};
use crate::clearing::ClearingService;
use crate::clearing::service::SettleTradeRequest;
use crate::fee::calculate_fee;
use crate::matching::events::Event;
use crate::matching::model::Side;
use crate::symbol::SymbolRegistry;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

const PENDING_SCAN_INTERVAL: Duration = Duration::from_secs(30);

pub struct SettlementConsumer<S: EventStream> {
    stream: Arc<S>,
    clearing: Arc<ClearingService>,
    symbols: SymbolRegistry,
    stream_name: String,
    group: String,
    consumer_name: String,
    claim_idle_ms: i64,
    dlq_retry_threshold: i64,
    retry_counts: Mutex<FxHashMap<String, i64>>,
}

impl<S: EventStream + 'static> SettlementConsumer<S> {
    pub fn new(
        stream: Arc<S>,
        clearing: Arc<ClearingService>,
        symbols: SymbolRegistry,
        stream_name: impl Into<String>,
        group: impl Into<String>,
        consumer_name: impl Into<String>,
        claim_idle_secs: i64,
        dlq_retry_threshold: i64,
    ) -> Self {
        Self {
            stream,
            clearing,
            symbols,
            stream_name: stream_name.into(),
            group: group.into(),
            consumer_name: consumer_name.into(),
            claim_idle_ms: claim_idle_secs * 1000,
            dlq_retry_threshold,
            retry_counts: Mutex::new(FxHashMap::default()),
        }
    }

    pub async fn run(self: Arc<Self>) {
        self.stream.ensure_group(&self.stream_name, &self.group).await.ok();

        let reclaimer = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(PENDING_SCAN_INTERVAL).await;
                reclaimer.reclaim_stale().await;
            }
        });

        loop {
            let messages = match self.stream.read_group(&self.stream_name, &self.group, &self.consumer_name, 16).await {
                Ok(messages) => messages,
                Err(err) => {
                    tracing::error!(error = %err, "settlement consumer read_group failed");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
            };

            if messages.is_empty() {
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }

            for message in messages {
                self.handle(message).await;
            }
        }
    }

    async fn reclaim_stale(&self) {
        let claimed = match self.stream.claim_idle(&self.stream_name, &self.group, &self.consumer_name, self.claim_idle_ms, 64).await {
            Ok(claimed) => claimed,
            Err(err) => {
                tracing::error!(error = %err, "pending reclaim scan failed");
                return;
            }
        };

        for message in claimed {
            self.handle(message).await;
        }
    }

    async fn handle(&self, message: StreamMessage) {
        let retry_count = {
            let mut counts = self.retry_counts.lock().expect("retry_counts mutex poisoned");
            let entry = counts.entry(message.id.clone()).or_insert(0);
            *entry
        };

        if retry_count > self.dlq_retry_threshold {
            if self
                .stream
                .move_to_dlq(&self.stream_name, &self.group, &self.consumer_name, &message, "retry_count_exceeded")
                .await
                .is_ok()
            {
                self.retry_counts.lock().expect("retry_counts mutex poisoned").remove(&message.id);
            }
            return;
        }

        match self.process(&message).await {
            Ok(()) => {
                if self.stream.ack(&self.stream_name, &self.group, &message.id).await.is_ok() {
                    self.retry_counts.lock().expect("retry_counts mutex poisoned").remove(&message.id);
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, msg_id = %message.id, "settlement event processing failed, leaving pending");
                let mut counts = self.retry_counts.lock().expect("retry_counts mutex poisoned");
                *counts.entry(message.id).or_insert(0) += 1;
            }
        }
    }

    async fn process(&self, message: &StreamMessage) -> Result<(), crate::errors::CoreError> {
        let event: Event = match serde_json::from_str(&message.payload) {
            Ok(event) => event,
            Err(_) => return Ok(()), // malformed payload: ack without work, never retried into a poison loop
        };

        let Event::TradeCreated {
            symbol_id,
            trade_id,
            maker_user_id,
            taker_user_id,
            price,
            qty,
            taker_side,
            ..
        } = event
        else {
            return Ok(()); // unknown/irrelevant event types ack without work
        };

        // The base/quote asset pair and fee rates come from the symbol's
        // configuration, not the event itself — the matching loop doesn't
        // carry clearing concerns.
        let Some(symbol) = self.symbols.get(symbol_id).await else {
            tracing::warn!(symbol_id, trade_id, "trade references unknown symbol, acking without settling");
            return Ok(());
        };

        let quote_amount = price as i64 * qty as i64;
        // maker always receives quote, taker always receives base when
        // buying; reversed on a sell. Fees are charged against the same
        // asset each side's settlement leg credits.
        let (maker_fee_basis, taker_fee_basis) = match taker_side {
            Side::Buy => (quote_amount as u64, qty),
            Side::Sell => (qty * price, qty),
        };
        let maker_fee = calculate_fee(maker_fee_basis, symbol.maker_fee_rate) as i64;
        let taker_fee = calculate_fee(taker_fee_basis, symbol.taker_fee_rate) as i64;

        self.clearing
            .settle_trade(SettleTradeRequest {
                trade_id,
                maker_user_id,
                taker_user_id,
                base_asset: symbol.base_asset_id,
                quote_asset: symbol.quote_asset_id,
                qty: qty as i64,
                quote_amount,
                maker_fee,
                taker_fee,
                taker_side,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_event_type_is_treated_as_ackable_noop() {
        let payload = serde_json::json!({"type": "order_accepted", "seq": 1, "command_id": 1, "order_id": 1, "symbol_id": 1, "user_id": 1, "leaves_qty": 10}).to_string();
        let event: Event = serde_json::from_str(&payload).unwrap();
        assert!(!matches!(event, Event::TradeCreated { .. }));
    }
}
