// #![deny(warnings)]

#[macro_use]
mod util;
pub use util::named;

pub mod cast;
pub mod channels;
pub mod config;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod logging;
pub mod media;
pub mod message;
pub mod orchestrator;
pub mod payload;
pub mod playlist;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_util;

pub use error::{Error, Result};
pub use orchestrator::PlaybackOrchestrator;
pub use session::DeviceSession;
