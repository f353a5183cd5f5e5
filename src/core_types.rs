//! Fundamental type aliases shared by every module.
//!
//! Kept as plain aliases rather than newtypes: these IDs are assigned by
//! different subsystems (the symbol registry, the account service, the
//! matching engine) and round-trip through Postgres and Redis constantly,
//! so the friction of wrapper types was judged not worth it here.

/// Asset identifier (e.g. BTC, USDT). Assigned by the symbol/asset registry.
pub type AssetId = u32;

/// Symbol identifier (e.g. BTC-USDT). Assigned by the symbol registry.
pub type SymbolId = u32;

/// User account identifier.
pub type UserId = u64;

/// Order identifier, unique within a symbol's order book.
pub type OrderId = u64;

/// Trade identifier, unique within a symbol.
pub type TradeId = u64;

/// Monotonically increasing per-symbol event sequence number.
pub type SeqNum = u64;

/// Monotonically increasing per-command identifier assigned by a router.
pub type CommandId = u64;
