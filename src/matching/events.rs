//! Wire types exchanged between the gateway, a symbol's matching loop, and
//! the durable event stream. `Command` is what the loop consumes from its
//! inbox; `Event` is what it produces onto its outbox, one contiguous block
//! per command with strictly increasing `seq`.

use super::model::{CancelReason, OrderType, RejectReason, Side, TimeInForce};
use crate::core_types::{CommandId, OrderId, SeqNum, SymbolId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    NewOrder {
        command_id: CommandId,
        order_id: OrderId,
        client_order_id: Option<String>,
        user_id: UserId,
        symbol_id: SymbolId,
        side: Side,
        order_type: OrderType,
        time_in_force: TimeInForce,
        price: u64,
        qty: u64,
    },
    CancelOrder {
        command_id: CommandId,
        order_id: OrderId,
        user_id: UserId,
        symbol_id: SymbolId,
    },
}

impl Command {
    pub fn symbol_id(&self) -> SymbolId {
        match self {
            Command::NewOrder { symbol_id, .. } => *symbol_id,
            Command::CancelOrder { symbol_id, .. } => *symbol_id,
        }
    }

    pub fn command_id(&self) -> CommandId {
        match self {
            Command::NewOrder { command_id, .. } => *command_id,
            Command::CancelOrder { command_id, .. } => *command_id,
        }
    }
}

/// One fact emitted by a symbol's matching loop. Every variant carries the
/// symbol-scoped `seq` that gives the stream its total order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    OrderAccepted {
        seq: SeqNum,
        command_id: CommandId,
        order_id: OrderId,
        symbol_id: SymbolId,
        user_id: UserId,
        leaves_qty: u64,
    },
    OrderRejected {
        seq: SeqNum,
        command_id: CommandId,
        order_id: OrderId,
        symbol_id: SymbolId,
        user_id: UserId,
        reason: RejectReason,
    },
    OrderCanceled {
        seq: SeqNum,
        command_id: CommandId,
        order_id: OrderId,
        symbol_id: SymbolId,
        user_id: UserId,
        reason: CancelReason,
        leaves_qty: u64,
    },
    TradeCreated {
        seq: SeqNum,
        symbol_id: SymbolId,
        trade_id: u64,
        maker_order_id: OrderId,
        taker_order_id: OrderId,
        maker_user_id: UserId,
        taker_user_id: UserId,
        price: u64,
        qty: u64,
        taker_side: Side,
    },
    OrderPartiallyFilled {
        seq: SeqNum,
        command_id: CommandId,
        order_id: OrderId,
        symbol_id: SymbolId,
        user_id: UserId,
        leaves_qty: u64,
        filled_qty: u64,
    },
    OrderFilled {
        seq: SeqNum,
        command_id: CommandId,
        order_id: OrderId,
        symbol_id: SymbolId,
        user_id: UserId,
        filled_qty: u64,
    },
}

impl Event {
    pub fn seq(&self) -> SeqNum {
        match self {
            Event::OrderAccepted { seq, .. }
            | Event::OrderRejected { seq, .. }
            | Event::OrderCanceled { seq, .. }
            | Event::TradeCreated { seq, .. }
            | Event::OrderPartiallyFilled { seq, .. }
            | Event::OrderFilled { seq, .. } => *seq,
        }
    }

    pub fn symbol_id(&self) -> SymbolId {
        match self {
            Event::OrderAccepted { symbol_id, .. }
            | Event::OrderRejected { symbol_id, .. }
            | Event::OrderCanceled { symbol_id, .. }
            | Event::TradeCreated { symbol_id, .. }
            | Event::OrderPartiallyFilled { symbol_id, .. }
            | Event::OrderFilled { symbol_id, .. } => *symbol_id,
        }
    }
}

/// Hands out strictly increasing sequence numbers for one symbol's stream.
#[derive(Debug, Default)]
pub struct SeqAllocator {
    next: SeqNum,
}

impl SeqAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_seq(&mut self) -> SeqNum {
        let seq = self.next;
        self.next += 1;
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_allocator_is_strictly_increasing() {
        let mut alloc = SeqAllocator::new();
        let a = alloc.next_seq();
        let b = alloc.next_seq();
        let c = alloc.next_seq();
        assert!(a < b && b < c);
    }

    #[test]
    fn command_symbol_id_matches_variant() {
        let cmd = Command::CancelOrder { command_id: 1, order_id: 2, user_id: 3, symbol_id: 7 };
        assert_eq!(cmd.symbol_id(), 7);
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = Event::TradeCreated {
            seq: 5,
            symbol_id: 1,
            trade_id: 99,
            maker_order_id: 1,
            taker_order_id: 2,
            maker_user_id: 10,
            taker_user_id: 20,
            price: 100,
            qty: 5,
            taker_side: Side::Buy,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.seq(), 5);
    }
}
