pub mod flv;
pub mod hevc;

pub use flv::FlvError;
