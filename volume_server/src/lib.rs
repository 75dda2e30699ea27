pub mod mixer;
pub mod mock_server;

pub use mixer::{Channel, Mixer, MixerError, MAX_LEVEL, MIN_LEVEL};
pub use mock_server::*;
