pub mod consumer;
pub mod stream;

pub use consumer::SettlementConsumer;
pub use stream::{EventStream, RedisEventStream, StreamMessage};
