//! In-memory order representation owned exclusively by one symbol's
//! matching loop.

use crate::core_types::{OrderId, SeqNum, SymbolId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
    PostOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    PostOnlyRejected,
    NoLiquidity,
    OrderNotFound,
    InvalidPrice,
    InvalidQuantity,
    SymbolHalted,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PostOnlyRejected => "post_only_rejected",
            Self::NoLiquidity => "no_liquidity",
            Self::OrderNotFound => "order_not_found",
            Self::InvalidPrice => "invalid_price",
            Self::InvalidQuantity => "invalid_quantity",
            Self::SymbolHalted => "symbol_halted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    UserCanceled,
    IocExpired,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserCanceled => "user_canceled",
            Self::IocExpired => "ioc_expired",
        }
    }
}

/// A resting or in-flight order. `price` is 0 for a market order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub order_id: OrderId,
    pub client_order_id: Option<String>,
    pub user_id: UserId,
    pub symbol_id: SymbolId,
    pub side: Side,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub price: u64,
    pub orig_qty: u64,
    pub leaves_qty: u64,
    pub arrival_seq: SeqNum,
}

impl Order {
    pub fn new(
        order_id: OrderId,
        user_id: UserId,
        symbol_id: SymbolId,
        side: Side,
        order_type: OrderType,
        time_in_force: TimeInForce,
        price: u64,
        qty: u64,
    ) -> Self {
        Self {
            order_id,
            client_order_id: None,
            user_id,
            symbol_id,
            side,
            order_type,
            time_in_force,
            price,
            orig_qty: qty,
            leaves_qty: qty,
            arrival_seq: 0,
        }
    }

    pub fn filled_qty(&self) -> u64 {
        self.orig_qty - self.leaves_qty
    }

    pub fn is_fully_filled(&self) -> bool {
        self.leaves_qty == 0
    }

    pub fn belongs_in_book(&self) -> bool {
        self.leaves_qty > 0 && self.order_type == OrderType::Limit
    }
}

/// An executed match between a resting maker and an incoming taker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trade {
    pub trade_id: u64,
    pub symbol_id: SymbolId,
    pub maker_order_id: OrderId,
    pub taker_order_id: OrderId,
    pub maker_user_id: UserId,
    pub taker_user_id: UserId,
    pub price: u64,
    pub qty: u64,
    pub taker_side: Side,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filled_qty_tracks_leaves() {
        let mut order = Order::new(1, 10, 1, Side::Buy, OrderType::Limit, TimeInForce::Gtc, 100, 50);
        order.leaves_qty = 20;
        assert_eq!(order.filled_qty(), 30);
        assert!(!order.is_fully_filled());
        order.leaves_qty = 0;
        assert!(order.is_fully_filled());
    }

    #[test]
    fn market_order_never_belongs_in_book() {
        let order = Order::new(1, 10, 1, Side::Buy, OrderType::Market, TimeInForce::Ioc, 0, 50);
        assert!(!order.belongs_in_book());
    }
}
