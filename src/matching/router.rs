//! Routes commands to one matching loop per symbol and fans the resulting
//! events out to a single outbox. Each symbol is owned by exactly one
//! OS thread so the book never needs a lock; the inbox is a bounded
//! lock-free queue so a slow symbol cannot block producers for other
//! symbols, and the outbox is a bounded blocking channel so a slow
//! consumer applies backpressure instead of letting memory grow.

use super::engine::MatchingEngine;
use super::events::{Command, Event};
use crate::core_types::SymbolId;
use crossbeam::channel::{Receiver, Sender, bounded};
use crossbeam_queue::ArrayQueue;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("inbox for symbol {0} is full")]
    QueueFull(SymbolId),
    #[error("no matching loop is running for symbol {0}")]
    UnknownSymbol(SymbolId),
}

struct EngineHandle {
    inbox: Arc<ArrayQueue<Command>>,
    notify: Arc<std::sync::Condvar>,
    notify_lock: Arc<std::sync::Mutex<()>>,
    worker: Option<JoinHandle<()>>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
}

/// Owns every symbol's matching loop and the shared event outbox. Cloning
/// is cheap; all state behind the clone is reference-counted.
#[derive(Clone)]
pub struct EngineRouter {
    inner: Arc<std::sync::Mutex<FxHashMap<SymbolId, EngineHandle>>>,
    outbox_tx: Sender<Event>,
    outbox_rx: Receiver<Event>,
    inbox_capacity: usize,
}

impl EngineRouter {
    pub fn new(inbox_capacity: usize, outbox_capacity: usize) -> Self {
        let (outbox_tx, outbox_rx) = bounded(outbox_capacity);
        Self { inner: Arc::new(std::sync::Mutex::new(FxHashMap::default())), outbox_tx, outbox_rx, inbox_capacity }
    }

    /// Channel consumers (e.g. the stream publisher) read events from here.
    pub fn outbox(&self) -> Receiver<Event> {
        self.outbox_rx.clone()
    }

    /// Starts a symbol's matching loop on its own thread if one isn't
    /// already running.
    pub fn ensure_started(&self, symbol_id: SymbolId) {
        let mut guard = self.inner.lock().expect("router mutex poisoned");
        if guard.contains_key(&symbol_id) {
            return;
        }

        let inbox: Arc<ArrayQueue<Command>> = Arc::new(ArrayQueue::new(self.inbox_capacity));
        let notify_lock = Arc::new(std::sync::Mutex::new(()));
        let notify = Arc::new(std::sync::Condvar::new());
        let shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let worker_inbox = inbox.clone();
        let worker_notify = notify.clone();
        let worker_notify_lock = notify_lock.clone();
        let worker_shutdown = shutdown.clone();
        let outbox_tx = self.outbox_tx.clone();

        let worker = std::thread::Builder::new()
            .name(format!("matching-{symbol_id}"))
            .spawn(move || run_symbol_loop(symbol_id, worker_inbox, worker_notify, worker_notify_lock, worker_shutdown, outbox_tx))
            .expect("failed to spawn matching loop thread");

        guard.insert(symbol_id, EngineHandle { inbox, notify, notify_lock, worker: Some(worker), shutdown });
    }

    /// Non-blocking enqueue. Returns `QueueFull` immediately rather than
    /// backing up a producer behind a busy symbol.
    pub fn submit(&self, command: Command) -> Result<(), EnqueueError> {
        let symbol_id = command.symbol_id();
        let guard = self.inner.lock().expect("router mutex poisoned");
        let handle = guard.get(&symbol_id).ok_or(EnqueueError::UnknownSymbol(symbol_id))?;
        handle.inbox.push(command).map_err(|_| EnqueueError::QueueFull(symbol_id))?;
        let _lock = handle.notify_lock.lock().expect("notify mutex poisoned");
        handle.notify.notify_one();
        Ok(())
    }

    /// Signals every symbol loop to drain its inbox and exit, then joins
    /// each worker thread. Events already queued before shutdown are still
    /// processed and pushed to the outbox.
    pub fn shutdown(&self) {
        let mut guard = self.inner.lock().expect("router mutex poisoned");
        for handle in guard.values() {
            handle.shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
            let _lock = handle.notify_lock.lock().expect("notify mutex poisoned");
            handle.notify.notify_one();
        }
        for handle in guard.values_mut() {
            if let Some(worker) = handle.worker.take() {
                let _ = worker.join();
            }
        }
    }
}

fn run_symbol_loop(
    symbol_id: SymbolId,
    inbox: Arc<ArrayQueue<Command>>,
    notify: Arc<std::sync::Condvar>,
    notify_lock: Arc<std::sync::Mutex<()>>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
    outbox_tx: Sender<Event>,
) {
    let mut engine = MatchingEngine::new(symbol_id);

    loop {
        while let Some(command) = inbox.pop() {
            let events = dispatch(&mut engine, command);
            for event in events {
                // Blocking send: a full outbox applies backpressure onto
                // this symbol's loop rather than dropping events.
                if outbox_tx.send(event).is_err() {
                    return;
                }
            }
        }

        if shutdown.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }

        let guard = notify_lock.lock().expect("notify mutex poisoned");
        let _ = notify.wait_timeout(guard, std::time::Duration::from_millis(100));
    }
}

fn dispatch(engine: &mut MatchingEngine, command: Command) -> Vec<Event> {
    match command {
        Command::NewOrder {
            command_id,
            order_id,
            user_id,
            side,
            order_type,
            time_in_force,
            price,
            qty,
            ..
        } => engine.new_order(command_id, order_id, user_id, side, order_type, time_in_force, price, qty),
        Command::CancelOrder { command_id, order_id, user_id, .. } => engine.cancel_order(command_id, order_id, user_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::model::{OrderType, Side, TimeInForce};
    use std::time::Duration;

    #[test]
    fn routes_command_to_its_symbol_loop_and_emits_events() {
        let router = EngineRouter::new(16, 16);
        router.ensure_started(1);

        router
            .submit(Command::NewOrder {
                command_id: 1,
                order_id: 1,
                client_order_id: None,
                user_id: 10,
                symbol_id: 1,
                side: Side::Sell,
                order_type: OrderType::Limit,
                time_in_force: TimeInForce::Gtc,
                price: 100,
                qty: 10,
            })
            .unwrap();

        let outbox = router.outbox();
        let event = outbox.recv_timeout(Duration::from_secs(2)).expect("event not produced in time");
        assert!(matches!(event, Event::OrderAccepted { .. }));
        router.shutdown();
    }

    #[test]
    fn submit_to_unknown_symbol_errors() {
        let router = EngineRouter::new(16, 16);
        let err = router
            .submit(Command::CancelOrder { command_id: 1, order_id: 1, user_id: 1, symbol_id: 99 })
            .unwrap_err();
        assert!(matches!(err, EnqueueError::UnknownSymbol(99)));
    }
}
