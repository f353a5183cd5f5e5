pub mod engine;
pub mod events;
pub mod model;
pub mod orderbook;
pub mod router;

pub use engine::MatchingEngine;
pub use events::{Command, Event};
pub use router::EngineRouter;
