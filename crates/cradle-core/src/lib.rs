pub mod background_sync;
pub mod config;
pub mod error;
pub mod platform;
pub mod queue;
pub mod recovery;
pub mod store;
pub mod telemetry;
pub mod tracker;
pub mod transport;

pub use cradle_proto as proto;
