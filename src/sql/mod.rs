//! SQL dialect abstraction.
//!
//! The compiler core emits SQL as text; the only dialect-specific behavior it
//! depends on is identifier and string-literal quoting, provided by [`dialect`].

pub mod dialect;

pub use dialect::{Dialect, SqlDialect};
