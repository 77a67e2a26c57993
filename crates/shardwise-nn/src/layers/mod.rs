//! Neural Network Layers
//!
//! Layer constructors producing [`Module`](crate::Module) nodes.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

pub mod linear;

// Re-exports
pub use linear::linear;
