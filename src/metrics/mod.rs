pub mod collector;
pub mod sender;

pub use collector::MetricsCollector;
