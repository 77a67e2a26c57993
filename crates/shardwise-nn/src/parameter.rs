//! Parameter - Shared Parameter Handle
//!
//! A parameter is a shared, mutable slot holding a [`TensorValue`]. Cloning
//! the handle aliases the same slot, so one parameter can be registered on
//! several modules and replacing its value is visible through every alias.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use shardwise_tensor::Tensor;

use crate::value::TensorValue;

// =============================================================================
// Parameter
// =============================================================================

/// A parameter of a module.
#[derive(Clone)]
pub struct Parameter {
    data: Arc<RwLock<TensorValue>>,
}

impl Parameter {
    /// Creates a parameter holding a dense tensor.
    #[must_use]
    pub fn new(data: Tensor) -> Self {
        Self::from_value(TensorValue::Dense(data))
    }

    /// Creates a parameter holding any value.
    #[must_use]
    pub fn from_value(value: TensorValue) -> Self {
        Self {
            data: Arc::new(RwLock::new(value)),
        }
    }

    /// Returns a clone of the current value.
    #[must_use]
    pub fn value(&self) -> TensorValue {
        self.data.read().clone()
    }

    /// Runs `f` against the current value without cloning it.
    pub fn with_value<R>(&self, f: impl FnOnce(&TensorValue) -> R) -> R {
        f(&self.data.read())
    }

    /// Replaces the value, returning the previous one.
    pub fn replace(&self, value: TensorValue) -> TensorValue {
        std::mem::replace(&mut *self.data.write(), value)
    }

    /// Kind of the current value.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.data.read().kind()
    }

    /// Identity of the underlying slot; equal for all aliases.
    #[must_use]
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.data) as usize
    }

    /// Returns true if both handles alias the same slot.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl From<Tensor> for Parameter {
    fn from(data: Tensor) -> Self {
        Self::new(data)
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.data.read();
        let mut s = f.debug_struct("Parameter");
        s.field("kind", &value.kind());
        match &*value {
            TensorValue::Sharded(st) => s.field("size", &st.size()),
            other => match other.as_dense() {
                Some(t) => s.field("shape", &t.shape()),
                None => s.field("shape", &"?"),
            },
        };
        s.finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_share_value() {
        let p = Parameter::new(Tensor::zeros(&[2]));
        let alias = p.clone();
        assert!(p.ptr_eq(&alias));
        assert_eq!(p.id(), alias.id());

        let old = alias.replace(TensorValue::Dense(Tensor::full(&[3], 1.0)));
        assert_eq!(old.into_dense().unwrap(), Tensor::zeros(&[2]));
        assert_eq!(p.with_value(|v| v.as_dense().unwrap().shape().to_vec()), vec![3]);
    }

    #[test]
    fn test_distinct_parameters_differ() {
        let a = Parameter::new(Tensor::zeros(&[2]));
        let b = Parameter::new(Tensor::zeros(&[2]));
        assert!(!a.ptr_eq(&b));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.kind(), "Tensor");
    }

    #[test]
    fn test_debug_shows_shape() {
        let p = Parameter::new(Tensor::zeros(&[4, 2]));
        let s = format!("{p:?}");
        assert!(s.contains("Tensor"));
        assert!(s.contains("[4, 2]"));
    }
}
