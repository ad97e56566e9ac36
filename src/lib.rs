pub mod config;
pub mod convolver;
pub mod engine;
pub mod error;
pub mod fft;
pub mod filter_storage;
pub mod osc_receiver;
pub mod pose;
pub mod scene;
pub mod sink;
pub mod sound_handler;

pub use config::BinSimConfig;
pub use engine::Engine;
pub use error::{BinSimError, Result};
