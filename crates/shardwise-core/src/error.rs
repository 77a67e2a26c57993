//! Error Types - Shardwise Error Handling
//!
//! A single error enum shared by the tensor, distributed, module and sharding
//! layers. Sharding failures are programmer or configuration errors; none of
//! them is retried internally.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// The main error type for Shardwise operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Input rejected before any work was done (e.g. a non-contiguous tensor).
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Description of the rejected input.
        message: String,
    },

    /// Ranks of a process group disagree on a value that must be identical.
    #[error(
        "{field}={value} on rank: {rank} does not match with {field}={peer_value} on rank: {peer_rank}"
    )]
    InconsistentConfiguration {
        /// Name of the disagreeing value.
        field: String,
        /// Rank detecting the mismatch.
        rank: usize,
        /// Value held by the detecting rank.
        value: String,
        /// Rank holding the other value.
        peer_rank: usize,
        /// Value held by the peer rank.
        peer_value: String,
    },

    /// Module has no attribute with the requested name.
    #[error("module: {module} does not have parameter with name: {name}")]
    NotFound {
        /// Kind of the module that was searched.
        module: String,
        /// Requested attribute name.
        name: String,
    },

    /// Attribute exists but holds the wrong kind of value.
    #[error("Expected {name} to be a {expected}, but found {actual}")]
    TypeMismatch {
        /// Qualified attribute name (`Kind.attr`).
        name: String,
        /// Kind that was expected.
        expected: String,
        /// Kind that was found.
        actual: String,
    },

    /// A scope that forbids nesting was entered twice.
    #[error("Reentrancy error: {message}")]
    Reentrancy {
        /// Description of the conflicting scope.
        message: String,
    },

    /// Shape mismatch between tensors.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// The expected shape.
        expected: Vec<usize>,
        /// The actual shape.
        actual: Vec<usize>,
    },

    /// Invalid dimension index.
    #[error("Invalid dimension: index {index} for tensor with {ndim} dimensions")]
    InvalidDimension {
        /// The invalid dimension index.
        index: i64,
        /// Number of dimensions in the tensor.
        ndim: usize,
    },

    /// Index out of bounds.
    #[error("Index out of bounds: index {index} for dimension of size {size}")]
    IndexOutOfBounds {
        /// The invalid index.
        index: usize,
        /// The size of the dimension.
        size: usize,
    },

    /// Operation not supported for the given value.
    #[error("Invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// A collective failed inside the communication backend.
    #[error("Communication error: {message}")]
    Communication {
        /// Description of the failure.
        message: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },

    /// No default process group was initialized for this rank.
    #[error("Default process group has not been initialized, please make sure to call init_process_group.")]
    DefaultGroupNotInitialized,
}

// =============================================================================
// Result Type
// =============================================================================

/// A specialized Result type for Shardwise operations.
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// Helper Functions
// =============================================================================

impl Error {
    /// Creates a new invalid input error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a new cross-rank mismatch error.
    #[must_use]
    pub fn inconsistent(
        field: impl Into<String>,
        rank: usize,
        value: impl Into<String>,
        peer_rank: usize,
        peer_value: impl Into<String>,
    ) -> Self {
        Self::InconsistentConfiguration {
            field: field.into(),
            rank,
            value: value.into(),
            peer_rank,
            peer_value: peer_value.into(),
        }
    }

    /// Creates a new shape mismatch error.
    #[must_use]
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Creates a new invalid operation error.
    #[must_use]
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a new communication error.
    #[must_use]
    pub fn communication(message: impl Into<String>) -> Self {
        Self::Communication {
            message: message.into(),
        }
    }

    /// Creates a new serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::shape_mismatch(&[2, 3], &[2, 4]);
        assert!(err.to_string().contains("Shape mismatch"));
    }

    #[test]
    fn test_inconsistent_display_names_both_ranks() {
        let err = Error::inconsistent("src_rank", 1, "1", 0, "0");
        assert_eq!(
            err.to_string(),
            "src_rank=1 on rank: 1 does not match with src_rank=0 on rank: 0"
        );
    }

    #[test]
    fn test_type_mismatch_display() {
        let err = Error::TypeMismatch {
            name: "Linear.bias".to_string(),
            expected: "Tensor".to_string(),
            actual: "None".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Expected Linear.bias to be a Tensor, but found None"
        );
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(
            Error::DefaultGroupNotInitialized,
            Error::DefaultGroupNotInitialized
        );
        assert_ne!(Error::invalid_input("a"), Error::invalid_input("b"));
    }
}
