//! Price-time priority order book.
//!
//! Asks are keyed by price ascending (lowest = best). Bids are keyed by
//! `u64::MAX - price` so that ascending BTreeMap iteration also yields
//! highest-price-first. A side index maps an id straight to its price and
//! side so cancel doesn't need to scan.

use super::model::{Order, Side, Trade};
use crate::core_types::OrderId;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, VecDeque};

type PriceLevel = VecDeque<Order>;

#[derive(Debug)]
pub struct OrderBook {
    asks: BTreeMap<u64, PriceLevel>,
    bids: BTreeMap<u64, PriceLevel>,
    order_index: FxHashMap<OrderId, (u64, Side)>,
    trade_id_counter: u64,
}

/// One resting order whose `leaves_qty` changed as a result of a match —
/// either reduced (partial) or removed entirely (fully filled).
#[derive(Debug, Clone)]
pub struct MakerUpdate {
    pub order: Order,
    pub fully_filled: bool,
}

/// Outcome of walking the opposite side for a taker order.
#[derive(Debug, Default)]
pub struct MatchOutcome {
    pub trades: Vec<Trade>,
    pub maker_updates: Vec<MakerUpdate>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            asks: BTreeMap::new(),
            bids: BTreeMap::new(),
            order_index: FxHashMap::default(),
            trade_id_counter: 0,
        }
    }

    pub fn next_trade_id(&mut self) -> u64 {
        self.trade_id_counter += 1;
        self.trade_id_counter
    }

    pub fn best_bid(&self) -> Option<u64> {
        self.bids.first_key_value().map(|(k, _)| u64::MAX - k)
    }

    pub fn best_ask(&self) -> Option<u64> {
        self.asks.first_key_value().map(|(k, _)| *k)
    }

    fn bid_key(price: u64) -> u64 {
        u64::MAX - price
    }

    /// Aggregate quantity resting at `price` on `side`, ignoring `user_id`'s
    /// own resting orders — used by the FOK pre-scan so self-trade-skipped
    /// liquidity is never counted as fillable.
    pub fn fillable_qty_excluding_user(&self, side: Side, limit_price: u64, user_id: u64) -> u64 {
        let levels = self.opposite_levels(side);
        let mut total = 0u64;
        for (key, level) in levels {
            let price = match side {
                Side::Buy => key,
                Side::Sell => Self::bid_key(key),
            };
            if !Self::price_acceptable(side, limit_price, price) {
                break;
            }
            total += level.iter().filter(|o| o.user_id != user_id).map(|o| o.leaves_qty).sum::<u64>();
        }
        total
    }

    fn opposite_levels(&self, taker_side: Side) -> Vec<(u64, &PriceLevel)> {
        match taker_side {
            // taker buys => walks asks ascending (raw price is the key)
            Side::Buy => self.asks.iter().map(|(&p, l)| (p, l)).collect(),
            // taker sells => walks bids ascending key (= descending price)
            Side::Sell => self.bids.iter().map(|(&k, l)| (k, l)).collect(),
        }
    }

    fn price_acceptable(taker_side: Side, limit_price: u64, maker_price: u64) -> bool {
        match taker_side {
            Side::Buy => maker_price <= limit_price,
            Side::Sell => maker_price >= limit_price,
        }
    }

    /// Walks the opposite side against `taker`, applying price/time
    /// priority and self-trade skip (same `user_id` makers are passed over,
    /// left resting, matching continues to the next price-time slot).
    /// `limit_price` is `u64::MAX` for a market buy and `0` for a market
    /// sell so every resting price is acceptable.
    pub fn match_order(&mut self, taker: &mut Order, limit_price: u64) -> MatchOutcome {
        let mut outcome = MatchOutcome::default();
        let side = taker.side;
        // Self-trade-skipped makers are popped out of the book to get past
        // them, then restored to the front of their level once matching for
        // this taker stops — so their FIFO position never moves.
        let mut skipped: Vec<(u64, Order)> = Vec::new();

        loop {
            if taker.leaves_qty == 0 {
                break;
            }
            let Some((maker_price, _)) = self.peek_best(side, limit_price) else {
                break;
            };
            let level = match self.level_mut(side, maker_price) {
                Some(level) => level,
                None => break,
            };
            let front_user = match level.front() {
                Some(front) => front.user_id,
                None => break,
            };

            if front_user == taker.user_id {
                let order = level.pop_front().unwrap();
                if level.is_empty() {
                    self.remove_level(side, maker_price);
                }
                skipped.push((maker_price, order));
                continue;
            }

            let maker = level.front_mut().unwrap();
            let trade_qty = taker.leaves_qty.min(maker.leaves_qty);
            taker.leaves_qty -= trade_qty;
            maker.leaves_qty -= trade_qty;
            let maker_order_id = maker.order_id;
            let maker_user_id = maker.user_id;
            let fully_filled = maker.leaves_qty == 0;
            let maker_snapshot = maker.clone();

            let trade_id = self.next_trade_id();
            outcome.trades.push(Trade {
                trade_id,
                symbol_id: taker.symbol_id,
                maker_order_id,
                taker_order_id: taker.order_id,
                maker_user_id,
                taker_user_id: taker.user_id,
                price: maker_price,
                qty: trade_qty,
                taker_side: taker.side,
            });

            if fully_filled {
                let level = self.level_mut(side, maker_price).unwrap();
                level.pop_front();
                let now_empty = level.is_empty();
                self.order_index.remove(&maker_snapshot.order_id);
                if now_empty {
                    self.remove_level(side, maker_price);
                }
            }
            outcome.maker_updates.push(MakerUpdate { order: maker_snapshot, fully_filled });
        }

        // Restore skipped makers, price-worst-first so repeated push_front
        // calls land them back in their original relative order.
        for (price, order) in skipped.into_iter().rev() {
            self.order_index.insert(order.order_id, (order.price, order.side));
            let level = self.level_mut_or_insert(side, price);
            level.push_front(order);
        }

        outcome
    }

    fn peek_best(&self, taker_side: Side, limit_price: u64) -> Option<(u64, OrderId)> {
        match taker_side {
            Side::Buy => {
                let (&price, level) = self.asks.first_key_value()?;
                if !Self::price_acceptable(taker_side, limit_price, price) {
                    return None;
                }
                Some((price, level.front()?.order_id))
            }
            Side::Sell => {
                let (&key, level) = self.bids.first_key_value()?;
                let price = Self::bid_key(key);
                if !Self::price_acceptable(taker_side, limit_price, price) {
                    return None;
                }
                Some((price, level.front()?.order_id))
            }
        }
    }

    fn level_mut_or_insert(&mut self, taker_side: Side, price: u64) -> &mut PriceLevel {
        match taker_side {
            Side::Buy => self.asks.entry(price).or_default(),
            Side::Sell => self.bids.entry(Self::bid_key(price)).or_default(),
        }
    }

    fn level_mut(&mut self, taker_side: Side, price: u64) -> Option<&mut PriceLevel> {
        match taker_side {
            Side::Buy => self.asks.get_mut(&price),
            Side::Sell => self.bids.get_mut(&Self::bid_key(price)),
        }
    }

    fn remove_level(&mut self, taker_side: Side, price: u64) {
        match taker_side {
            Side::Buy => {
                self.asks.remove(&price);
            }
            Side::Sell => {
                self.bids.remove(&Self::bid_key(price));
            }
        }
    }

    pub fn rest_order(&mut self, order: Order) {
        self.order_index.insert(order.order_id, (order.price, order.side));
        match order.side {
            Side::Buy => {
                self.bids.entry(Self::bid_key(order.price)).or_default().push_back(order);
            }
            Side::Sell => {
                self.asks.entry(order.price).or_default().push_back(order);
            }
        }
    }

    pub fn qty_at_price(&self, price: u64, side: Side) -> u64 {
        match side {
            Side::Buy => self
                .bids
                .get(&Self::bid_key(price))
                .map(|l| l.iter().map(|o| o.leaves_qty).sum())
                .unwrap_or(0),
            Side::Sell => self.asks.get(&price).map(|l| l.iter().map(|o| o.leaves_qty).sum()).unwrap_or(0),
        }
    }

    pub fn order_owner(&self, order_id: OrderId) -> Option<u64> {
        let (price, side) = self.order_index.get(&order_id).copied()?;
        let level = match side {
            Side::Buy => self.bids.get(&Self::bid_key(price)),
            Side::Sell => self.asks.get(&price),
        }?;
        level.iter().find(|o| o.order_id == order_id).map(|o| o.user_id)
    }

    pub fn remove_order_by_id(&mut self, order_id: OrderId) -> Option<Order> {
        let (price, side) = self.order_index.remove(&order_id)?;
        let (book, key) = match side {
            Side::Buy => (&mut self.bids, Self::bid_key(price)),
            Side::Sell => (&mut self.asks, price),
        };
        let level = book.get_mut(&key)?;
        let pos = level.iter().position(|o| o.order_id == order_id)?;
        let order = level.remove(pos)?;
        if level.is_empty() {
            book.remove(&key);
        }
        Some(order)
    }

    pub fn get_depth(&self, limit: usize) -> DepthSnapshot {
        let bids = self
            .bids
            .iter()
            .take(limit)
            .map(|(&key, level)| (Self::bid_key(key), level.iter().map(|o| o.leaves_qty).sum()))
            .collect();
        let asks = self
            .asks
            .iter()
            .take(limit)
            .map(|(&price, level)| (price, level.iter().map(|o| o.leaves_qty).sum()))
            .collect();
        DepthSnapshot { bids, asks }
    }
}

#[derive(Debug, Clone)]
pub struct DepthSnapshot {
    pub bids: Vec<(u64, u64)>,
    pub asks: Vec<(u64, u64)>,
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::model::{OrderType, TimeInForce};

    fn order(id: u64, user: u64, price: u64, qty: u64, side: Side) -> Order {
        Order::new(id, user, 1, side, OrderType::Limit, TimeInForce::Gtc, price, qty)
    }

    #[test]
    fn rest_and_best_bid_ask() {
        let mut book = OrderBook::new();
        book.rest_order(order(1, 1, 100, 10, Side::Buy));
        book.rest_order(order(2, 1, 99, 10, Side::Buy));
        book.rest_order(order(3, 1, 101, 10, Side::Sell));
        assert_eq!(book.best_bid(), Some(100));
        assert_eq!(book.best_ask(), Some(101));
    }

    #[test]
    fn full_fill_at_resting_price() {
        let mut book = OrderBook::new();
        book.rest_order(order(1, 10, 100, 100, Side::Sell));

        let mut taker = order(2, 20, 100, 100, Side::Buy);
        let outcome = book.match_order(&mut taker, 100);

        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].qty, 100);
        assert_eq!(outcome.trades[0].price, 100);
        assert!(taker.is_fully_filled());
        assert!(outcome.maker_updates[0].fully_filled);
        assert_eq!(book.best_ask(), None);
    }

    #[test]
    fn partial_fill_leaves_remainder_restable() {
        let mut book = OrderBook::new();
        book.rest_order(order(1, 10, 100, 50, Side::Sell));

        let mut taker = order(2, 20, 100, 100, Side::Buy);
        let outcome = book.match_order(&mut taker, 100);

        assert_eq!(outcome.trades[0].qty, 50);
        assert_eq!(taker.leaves_qty, 50);
        book.rest_order(taker);
        assert_eq!(book.qty_at_price(100, Side::Buy), 50);
    }

    #[test]
    fn price_time_priority_walks_best_price_first() {
        let mut book = OrderBook::new();
        book.rest_order(order(1, 10, 102, 5, Side::Sell));
        book.rest_order(order(2, 10, 100, 5, Side::Sell));
        book.rest_order(order(3, 10, 101, 5, Side::Sell));

        let mut taker = order(4, 20, 105, 10, Side::Buy);
        let outcome = book.match_order(&mut taker, 105);

        assert_eq!(outcome.trades.len(), 2);
        assert_eq!(outcome.trades[0].price, 100);
        assert_eq!(outcome.trades[0].maker_order_id, 2);
        assert_eq!(outcome.trades[1].price, 101);
        assert_eq!(outcome.trades[1].maker_order_id, 3);
    }

    #[test]
    fn fifo_within_same_price_level() {
        let mut book = OrderBook::new();
        book.rest_order(order(1, 10, 100, 5, Side::Sell));
        book.rest_order(order(2, 10, 100, 5, Side::Sell));

        let mut taker = order(3, 20, 100, 5, Side::Buy);
        let outcome = book.match_order(&mut taker, 100);
        assert_eq!(outcome.trades[0].maker_order_id, 1);
    }

    #[test]
    fn self_trade_skips_same_user_maker() {
        let mut book = OrderBook::new();
        book.rest_order(order(1, 10, 100, 10, Side::Sell)); // same user as taker
        book.rest_order(order(2, 11, 100, 5, Side::Sell));

        let mut taker = order(3, 10, 100, 5, Side::Buy);
        let outcome = book.match_order(&mut taker, 100);

        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].maker_order_id, 2);
        assert!(taker.is_fully_filled());
        // user 10's resting maker order 1 is untouched
        assert_eq!(book.qty_at_price(100, Side::Sell), 10);
    }

    #[test]
    fn cancel_removes_order_and_empty_level() {
        let mut book = OrderBook::new();
        book.rest_order(order(1, 10, 100, 10, Side::Buy));
        let removed = book.remove_order_by_id(1).unwrap();
        assert_eq!(removed.order_id, 1);
        assert_eq!(book.best_bid(), None);
    }

    #[test]
    fn depth_orders_bids_descending_and_asks_ascending() {
        let mut book = OrderBook::new();
        book.rest_order(order(1, 10, 100, 10, Side::Buy));
        book.rest_order(order(2, 10, 99, 20, Side::Buy));
        book.rest_order(order(3, 10, 101, 5, Side::Sell));

        let depth = book.get_depth(5);
        assert_eq!(depth.bids, vec![(100, 10), (99, 20)]);
        assert_eq!(depth.asks, vec![(101, 5)]);
    }
}
