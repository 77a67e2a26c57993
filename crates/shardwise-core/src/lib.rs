//! Shardwise Core - Foundation Layer for the Shardwise Sharding Framework
//!
//! This crate holds the pieces every other Shardwise crate agrees on: the
//! unified error taxonomy and its `Result` alias.
//!
//! # Example
//! ```rust
//! use shardwise_core::{Error, Result};
//!
//! fn check(contiguous: bool) -> Result<()> {
//!     if !contiguous {
//!         return Err(Error::invalid_input("input tensor is not a contiguous Tensor"));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check(false).is_err());
//! ```
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{Error, Result};
