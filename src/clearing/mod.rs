pub mod balance;
pub mod ledger;
pub mod rpc;
pub mod service;
pub mod store;

pub use balance::Balance;
pub use ledger::Ledger;
pub use service::ClearingService;
pub use store::{BalanceStore, PostgresBalanceStore};
