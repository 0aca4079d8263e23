pub mod assets;
pub mod bbox;
pub mod bootstrap;
pub mod capability;
pub mod config;
pub mod device;
pub mod download;
pub mod error;
mod glyphs;
pub mod hf;
pub mod pipeline;
pub mod postprocess;
pub mod preprocess;
pub mod segmenter;
pub mod state;
pub mod store;

pub use error::Result;
