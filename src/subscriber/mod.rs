pub mod hls;
pub mod stream;

pub use self::{hls::HlsSubscriber, stream::StreamSubscriber};
