pub mod appender;
pub mod config;
pub mod container_specs;
pub mod digest;
pub mod error;
pub mod image;
pub mod layer;
pub mod progress;
pub mod reference;
pub mod registry;

pub use appender::Appender;
pub use config::ContainConfig;
pub use error::{AppendError, MisuseError};
