//! Configuration: typed settings plus the layered [`ConfigLoader`]

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::*;
