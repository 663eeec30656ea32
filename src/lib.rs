pub mod broadcast;
pub mod codec;
pub mod config;
pub mod errors;
pub mod logger;
pub mod registry;
pub mod server;
pub mod subscriber;
pub mod transport;

pub use self::{
    broadcast::{CameraBroadcaster, FlvBroadcaster, HlsBroadcaster},
    registry::Registry,
    server::{AppContext, Service},
};
