//! The `utils` module collects the pieces shared by every other module of
//! the relay: the error types and the logging bootstrap.

pub mod error;
pub mod logging;

pub use error::{BusError, RelayError};

#[cfg(test)]
mod tests;
