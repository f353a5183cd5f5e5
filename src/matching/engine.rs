//! Single-symbol matching loop. One `MatchingEngine` owns one `OrderBook`
//! and is the only writer that ever touches it — callers hand it commands
//! and drain the events it returns, never touching the book directly.
//!
//! The time-in-force policy below is evaluated in a fixed order: a
//! POST_ONLY that would cross is rejected before anything else runs; a FOK
//! pre-scans the book for fillable depth before a single unit is matched;
//! only after those gates pass does the order walk the book.

use super::events::{Event, SeqAllocator};
use super::model::{CancelReason, Order, OrderType, RejectReason, Side, TimeInForce};
use super::orderbook::OrderBook;
use crate::core_types::{CommandId, OrderId, SymbolId, UserId};

pub struct MatchingEngine {
    symbol_id: SymbolId,
    book: OrderBook,
    seq: SeqAllocator,
}

impl MatchingEngine {
    pub fn new(symbol_id: SymbolId) -> Self {
        Self { symbol_id, book: OrderBook::new(), seq: SeqAllocator::new() }
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_order(
        &mut self,
        command_id: CommandId,
        order_id: OrderId,
        user_id: UserId,
        side: Side,
        order_type: OrderType,
        time_in_force: TimeInForce,
        price: u64,
        qty: u64,
    ) -> Vec<Event> {
        let limit_price = match order_type {
            OrderType::Limit => price,
            OrderType::Market => match side {
                Side::Buy => u64::MAX,
                Side::Sell => 0,
            },
        };

        if time_in_force == TimeInForce::PostOnly {
            let crosses = match side {
                Side::Buy => self.book.best_ask().is_some_and(|ask| ask <= limit_price),
                Side::Sell => self.book.best_bid().is_some_and(|bid| bid >= limit_price),
            };
            if crosses {
                return vec![self.reject(command_id, order_id, user_id, RejectReason::PostOnlyRejected)];
            }
        }

        if time_in_force == TimeInForce::Fok {
            let fillable = self.book.fillable_qty_excluding_user(side, limit_price, user_id);
            if fillable < qty {
                return vec![self.reject(command_id, order_id, user_id, RejectReason::NoLiquidity)];
            }
        }

        let mut taker = Order::new(order_id, user_id, self.symbol_id, side, order_type, time_in_force, price, qty);
        let outcome = self.book.match_order(&mut taker, limit_price);

        if order_type == OrderType::Market && taker.filled_qty() == 0 {
            return vec![self.reject(command_id, order_id, user_id, RejectReason::NoLiquidity)];
        }

        let mut events = Vec::with_capacity(outcome.trades.len() + outcome.maker_updates.len() + 1);

        for trade in &outcome.trades {
            events.push(Event::TradeCreated {
                seq: self.seq.next_seq(),
                symbol_id: self.symbol_id,
                trade_id: trade.trade_id,
                maker_order_id: trade.maker_order_id,
                taker_order_id: trade.taker_order_id,
                maker_user_id: trade.maker_user_id,
                taker_user_id: trade.taker_user_id,
                price: trade.price,
                qty: trade.qty,
                taker_side: trade.taker_side,
            });
        }

        for update in &outcome.maker_updates {
            let event = if update.fully_filled {
                Event::OrderFilled {
                    seq: self.seq.next_seq(),
                    command_id,
                    order_id: update.order.order_id,
                    symbol_id: self.symbol_id,
                    user_id: update.order.user_id,
                    filled_qty: update.order.filled_qty(),
                }
            } else {
                Event::OrderPartiallyFilled {
                    seq: self.seq.next_seq(),
                    command_id,
                    order_id: update.order.order_id,
                    symbol_id: self.symbol_id,
                    user_id: update.order.user_id,
                    leaves_qty: update.order.leaves_qty,
                    filled_qty: update.order.filled_qty(),
                }
            };
            events.push(event);
        }

        events.extend(self.taker_terminal_events(command_id, taker));
        events
    }

    /// Every non-fully-filled taker that executed at least one unit gets its
    /// own `OrderPartiallyFilled` ahead of whatever terminal event follows
    /// (rest, expire, or reject) — mirroring the maker-side update above.
    fn taker_terminal_events(&mut self, command_id: CommandId, taker: Order) -> Vec<Event> {
        let order_id = taker.order_id;
        let user_id = taker.user_id;
        let symbol_id = self.symbol_id;

        if taker.is_fully_filled() {
            return vec![Event::OrderFilled { seq: self.seq.next_seq(), command_id, order_id, symbol_id, user_id, filled_qty: taker.filled_qty() }];
        }

        // A market remainder's own terminal event already is the
        // `OrderPartiallyFilled` (market never rests, never cancels) so it
        // must not also get the generic one below.
        let is_market_remainder =
            taker.order_type == OrderType::Market && matches!(taker.time_in_force, TimeInForce::Gtc | TimeInForce::PostOnly);

        let mut events = Vec::with_capacity(2);
        if taker.filled_qty() > 0 && !is_market_remainder {
            events.push(Event::OrderPartiallyFilled {
                seq: self.seq.next_seq(),
                command_id,
                order_id,
                symbol_id,
                user_id,
                leaves_qty: taker.leaves_qty,
                filled_qty: taker.filled_qty(),
            });
        }

        let terminal = match taker.time_in_force {
            TimeInForce::Ioc => Event::OrderCanceled {
                seq: self.seq.next_seq(),
                command_id,
                order_id,
                symbol_id,
                user_id,
                reason: CancelReason::IocExpired,
                leaves_qty: taker.leaves_qty,
            },
            TimeInForce::Fok => {
                // pre-scan guaranteed full fill; unreachable in practice.
                Event::OrderFilled { seq: self.seq.next_seq(), command_id, order_id, symbol_id, user_id, filled_qty: taker.filled_qty() }
            }
            TimeInForce::Gtc | TimeInForce::PostOnly => {
                if taker.order_type == OrderType::Market {
                    Event::OrderPartiallyFilled {
                        seq: self.seq.next_seq(),
                        command_id,
                        order_id,
                        symbol_id,
                        user_id,
                        leaves_qty: taker.leaves_qty,
                        filled_qty: taker.filled_qty(),
                    }
                } else {
                    let leaves_qty = taker.leaves_qty;
                    self.book.rest_order(taker);
                    Event::OrderAccepted { seq: self.seq.next_seq(), command_id, order_id, symbol_id, user_id, leaves_qty }
                }
            }
        };
        events.push(terminal);
        events
    }

    pub fn cancel_order(&mut self, command_id: CommandId, order_id: OrderId, user_id: UserId) -> Vec<Event> {
        match self.book.order_owner(order_id) {
            Some(owner) if owner == user_id => {
                let order = self.book.remove_order_by_id(order_id).expect("owner lookup implies presence");
                vec![Event::OrderCanceled {
                    seq: self.seq.next_seq(),
                    command_id,
                    order_id,
                    symbol_id: self.symbol_id,
                    user_id,
                    reason: CancelReason::UserCanceled,
                    leaves_qty: order.leaves_qty,
                }]
            }
            _ => vec![self.reject(command_id, order_id, user_id, RejectReason::OrderNotFound)],
        }
    }

    fn reject(&mut self, command_id: CommandId, order_id: OrderId, user_id: UserId, reason: RejectReason) -> Event {
        Event::OrderRejected { seq: self.seq.next_seq(), command_id, order_id, symbol_id: self.symbol_id, user_id, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> MatchingEngine {
        MatchingEngine::new(1)
    }

    #[test]
    fn full_fill_at_resting_price() {
        let mut eng = engine();
        eng.new_order(1, 1, 10, Side::Sell, OrderType::Limit, TimeInForce::Gtc, 100, 50);
        let events = eng.new_order(2, 2, 20, Side::Buy, OrderType::Limit, TimeInForce::Gtc, 100, 50);
        assert!(matches!(events.last().unwrap(), Event::OrderFilled { .. }));
        assert!(events.iter().any(|e| matches!(e, Event::TradeCreated { qty: 50, .. })));
    }

    #[test]
    fn partial_fill_gtc_rests_remainder() {
        let mut eng = engine();
        eng.new_order(1, 1, 10, Side::Sell, OrderType::Limit, TimeInForce::Gtc, 100, 20);
        let events = eng.new_order(2, 2, 20, Side::Buy, OrderType::Limit, TimeInForce::Gtc, 100, 50);
        assert!(matches!(events.last().unwrap(), Event::OrderAccepted { leaves_qty: 30, .. }));
        assert_eq!(eng.book().qty_at_price(100, Side::Buy), 30);
    }

    #[test]
    fn partial_fill_emits_takers_own_partially_filled_before_it_rests() {
        // scenario: resting SELL 50@100; taker BUY 100@100 gtc.
        let mut eng = engine();
        eng.new_order(1, 1, 10, Side::Sell, OrderType::Limit, TimeInForce::Gtc, 100, 50);
        let events = eng.new_order(2, 2, 20, Side::Buy, OrderType::Limit, TimeInForce::Gtc, 100, 100);
        let taker_partial = events
            .iter()
            .find(|e| matches!(e, Event::OrderPartiallyFilled { order_id: 2, .. }))
            .expect("taker's own OrderPartiallyFilled is missing");
        assert!(matches!(taker_partial, Event::OrderPartiallyFilled { filled_qty: 50, leaves_qty: 50, .. }));
        assert!(matches!(events.last().unwrap(), Event::OrderAccepted { leaves_qty: 50, .. }));
    }

    #[test]
    fn partial_fill_ioc_emits_takers_own_partially_filled_before_it_expires() {
        let mut eng = engine();
        eng.new_order(1, 1, 10, Side::Sell, OrderType::Limit, TimeInForce::Gtc, 100, 5);
        let events = eng.new_order(2, 2, 20, Side::Buy, OrderType::Limit, TimeInForce::Ioc, 100, 10);
        assert!(events.iter().any(|e| matches!(e, Event::OrderPartiallyFilled { order_id: 2, filled_qty: 5, leaves_qty: 5, .. })));
        assert!(matches!(events.last().unwrap(), Event::OrderCanceled { reason: CancelReason::IocExpired, leaves_qty: 5, .. }));
    }

    #[test]
    fn self_trade_skip_does_not_fill_own_resting_order() {
        let mut eng = engine();
        eng.new_order(1, 1, 99, Side::Sell, OrderType::Limit, TimeInForce::Gtc, 100, 10);
        let events = eng.new_order(2, 2, 99, Side::Buy, OrderType::Limit, TimeInForce::Gtc, 100, 10);
        assert!(!events.iter().any(|e| matches!(e, Event::TradeCreated { .. })));
        assert!(matches!(events.last().unwrap(), Event::OrderAccepted { .. }));
    }

    #[test]
    fn post_only_crossing_is_rejected_with_no_book_change() {
        let mut eng = engine();
        eng.new_order(1, 1, 10, Side::Sell, OrderType::Limit, TimeInForce::Gtc, 100, 10);
        let events = eng.new_order(2, 2, 20, Side::Buy, OrderType::Limit, TimeInForce::PostOnly, 100, 10);
        assert!(matches!(events.last().unwrap(), Event::OrderRejected { reason: RejectReason::PostOnlyRejected, .. }));
        assert_eq!(eng.book().best_bid(), None);
    }

    #[test]
    fn fok_rejects_wholesale_on_insufficient_depth() {
        let mut eng = engine();
        eng.new_order(1, 1, 10, Side::Sell, OrderType::Limit, TimeInForce::Gtc, 100, 5);
        let events = eng.new_order(2, 2, 20, Side::Buy, OrderType::Limit, TimeInForce::Fok, 100, 10);
        assert!(matches!(events.last().unwrap(), Event::OrderRejected { reason: RejectReason::NoLiquidity, .. }));
        assert_eq!(events.len(), 1);
        assert_eq!(eng.book().qty_at_price(100, Side::Sell), 5);
    }

    #[test]
    fn ioc_leftover_cancels_instead_of_resting() {
        let mut eng = engine();
        eng.new_order(1, 1, 10, Side::Sell, OrderType::Limit, TimeInForce::Gtc, 100, 5);
        let events = eng.new_order(2, 2, 20, Side::Buy, OrderType::Limit, TimeInForce::Ioc, 100, 10);
        assert!(matches!(events.last().unwrap(), Event::OrderCanceled { reason: CancelReason::IocExpired, leaves_qty: 5, .. }));
        assert_eq!(eng.book().best_bid(), None);
    }

    #[test]
    fn market_buy_with_no_liquidity_is_rejected() {
        let mut eng = engine();
        let events = eng.new_order(1, 1, 20, Side::Buy, OrderType::Market, TimeInForce::Ioc, 0, 10);
        assert!(matches!(events.last().unwrap(), Event::OrderRejected { reason: RejectReason::NoLiquidity, .. }));
    }

    #[test]
    fn cancel_unknown_order_is_rejected() {
        let mut eng = engine();
        let events = eng.cancel_order(1, 999, 1);
        assert!(matches!(events[0], Event::OrderRejected { reason: RejectReason::OrderNotFound, .. }));
    }

    #[test]
    fn cancel_by_non_owner_is_rejected() {
        let mut eng = engine();
        eng.new_order(1, 1, 10, Side::Buy, OrderType::Limit, TimeInForce::Gtc, 100, 10);
        let events = eng.cancel_order(2, 1, 999);
        assert!(matches!(events[0], Event::OrderRejected { reason: RejectReason::OrderNotFound, .. }));
    }

    #[test]
    fn event_seq_is_strictly_increasing_within_a_command() {
        let mut eng = engine();
        eng.new_order(1, 1, 10, Side::Sell, OrderType::Limit, TimeInForce::Gtc, 100, 5);
        eng.new_order(2, 2, 11, Side::Sell, OrderType::Limit, TimeInForce::Gtc, 100, 5);
        let events = eng.new_order(3, 3, 20, Side::Buy, OrderType::Limit, TimeInForce::Gtc, 100, 10);
        let seqs: Vec<_> = events.iter().map(|e| e.seq()).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }
}
