//! The `security` module enforces which destinations a client may relay to.
//!
//! A peer may only relay traffic to destinations this side has asked it to
//! forward. [`SecurityFilterManager`] records those forwarding requests per
//! peer through a request observer placed on the outbound stream, and checks
//! inbound records against them with a filter.

pub mod filter;

pub use filter::{ClientEndpoints, SecurityFilter, SecurityFilterManager};
