//! §4.4 Channel Factory.

pub mod channel;
pub mod factory;

pub use channel::Channel;
pub use factory::{ChannelConstructor, ChannelFactory, ChannelInstance};
