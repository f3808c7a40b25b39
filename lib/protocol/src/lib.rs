mod classify;
pub mod content_negotiation;
mod error;
mod format;
pub mod protocol;

pub use classify::*;
pub use error::*;
pub use format::*;
