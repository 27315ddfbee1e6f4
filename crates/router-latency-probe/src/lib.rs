pub mod client;
mod error;
pub mod event;
pub mod probe;
pub mod scheduler;
pub mod settings;
pub mod stream;

pub use error::{Error, Result, with_retry};
