pub mod rpc;
pub mod service;
pub mod state;

pub use service::WithdrawService;
pub use state::WithdrawState;
