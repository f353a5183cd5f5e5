//! Exchange core: a single-writer-per-symbol matching engine, a
//! double-entry clearing ledger, and the withdraw/deposit lifecycles that
//! sit on top of it.
//!
//! - [`matching`] - order book, per-symbol matching loop, command/event wire types
//! - [`clearing`] - enforced balance type, Postgres store, ledger, RPC surface
//! - [`settlement`] - durable event stream and the consumer that settles trades
//! - [`withdraw`] - withdrawal state machine and service
//! - [`deposit`] - chain scanning and deposit crediting
//! - [`symbol`] - read-only symbol configuration registry
//! - [`money`] - scaled-integer amount types
//! - [`fee`] - fee calculation
//! - [`errors`] - wire-stable error kinds
//! - [`config`] - process configuration
//! - [`logging`] - structured logging bootstrap
//! - [`db`] - Postgres connection pool

pub mod core_types;

pub mod clearing;
pub mod config;
pub mod db;
pub mod deposit;
pub mod errors;
pub mod fee;
pub mod logging;
pub mod matching;
pub mod money;
pub mod settlement;
pub mod symbol;
pub mod withdraw;

pub use clearing::{Balance, ClearingService, Ledger};
pub use config::AppConfig;
pub use core_types::{AssetId, CommandId, OrderId, SeqNum, SymbolId, TradeId, UserId};
pub use errors::{CoreError, ErrorKind};
pub use matching::{Command, EngineRouter, Event, MatchingEngine};
pub use symbol::{SymbolConfig, SymbolRegistry};
