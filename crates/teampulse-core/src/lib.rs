pub mod analyzer;
pub mod config;
pub mod context;
pub mod error;
pub mod learning;
pub mod summary;

pub use analyzer::*;
pub use config::*;
pub use context::*;
pub use error::*;
pub use learning::*;
pub use summary::*;
