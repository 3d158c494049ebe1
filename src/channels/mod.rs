//! Protocol channels, one per namespace, each built on a shared [`Dispatcher`].
//!
//! Each channel pairs a public handle used to send requests with a private
//! state struct registered as the namespace's [`ChannelHandler`].
//!
//! [`Dispatcher`]: crate::dispatcher::Dispatcher
//! [`ChannelHandler`]: crate::dispatcher::ChannelHandler

pub mod connection;
pub mod heartbeat;
pub mod media;
pub mod receiver;

pub use connection::ConnectionChannel;
pub use heartbeat::HeartbeatChannel;
pub use media::MediaChannel;
pub use receiver::ReceiverChannel;
