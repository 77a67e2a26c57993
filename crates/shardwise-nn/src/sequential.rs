//! Sequential - Sequential Container for Modules
//!
//! A container that runs its children in declaration order, passing the
//! output of each as the input to the next.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use crate::module::Module;

// =============================================================================
// Constructors
// =============================================================================

/// Chains modules, naming them `"0"`, `"1"`, ...
///
/// # Example
/// ```rust
/// use shardwise_nn::{linear, sequential};
/// use shardwise_tensor::Tensor;
///
/// let model = sequential(vec![
///     linear(Tensor::zeros(&[4, 2]), None),
///     linear(Tensor::zeros(&[2, 4]), None),
/// ]);
/// assert!(model.get_submodule("1").is_some());
/// ```
#[must_use]
pub fn sequential(modules: Vec<Module>) -> Module {
    sequential_named(
        modules
            .into_iter()
            .enumerate()
            .map(|(i, m)| (i.to_string(), m))
            .collect(),
    )
}

/// Chains modules under the given names.
#[must_use]
pub fn sequential_named(modules: Vec<(String, Module)>) -> Module {
    modules
        .into_iter()
        .fold(Module::new("Sequential"), |seq, (name, m)| seq.with_module(name, m))
        .with_forward(|module, input| {
            let mut x = input.clone();
            for (_, child) in module.children() {
                x = child.forward(&x)?;
            }
            Ok(x)
        })
}

// =============================================================================
// Tests
// =============================================================================
