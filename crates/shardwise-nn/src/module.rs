//! Module - Neural Network Module Tree
//!
//! A [`Module`] is a node with a kind name, an ordered parameter table, ordered
//! named children, an optional forward function and forward hooks. Trees are
//! built from data rather than from one Rust type per layer, which lets the
//! sharding engine replace parameter entries and attach hooks on any node.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use shardwise_core::error::{Error, Result};
use tracing::trace;

use crate::parameter::Parameter;
use crate::value::TensorValue;

// =============================================================================
// Callbacks
// =============================================================================

/// Forward computation of a module.
pub type ForwardFn = Arc<dyn Fn(&Module, &TensorValue) -> Result<TensorValue> + Send + Sync>;

/// Hook run after a module's forward: `(module, input, output)`.
///
/// Returning `Some(value)` replaces the output; `None` keeps it.
pub type ForwardHook =
    Arc<dyn Fn(&Module, &TensorValue, &TensorValue) -> Result<Option<TensorValue>> + Send + Sync>;

/// Handle for removing a registered hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookHandle(usize);

// =============================================================================
// Attribute
// =============================================================================

/// What a name resolves to on a module.
#[derive(Debug, Clone, Copy)]
pub enum Attribute<'a> {
    /// A registered parameter.
    Parameter(&'a Parameter),
    /// A parameter slot registered as empty.
    Empty,
    /// A child module.
    Module(&'a Module),
}

impl Attribute<'_> {
    /// Type name used in error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Attribute::Parameter(p) => p.kind(),
            Attribute::Empty => "None",
            Attribute::Module(_) => "Module",
        }
    }
}

// =============================================================================
// Module
// =============================================================================

/// A node of a module tree.
///
/// Cloning a module copies the tree structure and hooks but not the
/// parameters: the clone holds the same [`Parameter`] handles, so replacing a
/// parameter value (for example by sharding the clone) is visible through the
/// original too. Build a fresh tree to get independent parameters.
#[derive(Clone)]
pub struct Module {
    kind: String,
    parameters: Vec<(String, Option<Parameter>)>,
    children: Vec<(String, Module)>,
    forward_fn: Option<ForwardFn>,
    hooks: Vec<(HookHandle, ForwardHook)>,
    next_hook_id: usize,
}

impl Module {
    /// Creates an empty module of the given kind.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            parameters: Vec::new(),
            children: Vec::new(),
            forward_fn: None,
            hooks: Vec::new(),
            next_hook_id: 0,
        }
    }

    /// Sets the forward computation.
    #[must_use]
    pub fn with_forward<F>(mut self, forward: F) -> Self
    where
        F: Fn(&Module, &TensorValue) -> Result<TensorValue> + Send + Sync + 'static,
    {
        self.forward_fn = Some(Arc::new(forward));
        self
    }

    /// Kind name, e.g. `Linear`.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    // =========================================================================
    // Parameter Table
    // =========================================================================

    /// Registers a parameter, replacing an existing entry of the same name in
    /// place.
    pub fn register_parameter(&mut self, name: impl Into<String>, param: Option<Parameter>) {
        let name = name.into();
        match self.parameters.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = param,
            None => self.parameters.push((name, param)),
        }
    }

    /// Builder form of [`register_parameter`](Self::register_parameter).
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, param: Option<Parameter>) -> Self {
        self.register_parameter(name, param);
        self
    }

    /// Returns the parameter registered under `name`, if set.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, p)| p.as_ref())
    }

    /// Local parameter entries in declaration order, including empty slots.
    #[must_use]
    pub fn local_parameters(&self) -> &[(String, Option<Parameter>)] {
        &self.parameters
    }

    /// Removes the entry `name`, returning its position and value.
    pub fn take_parameter(&mut self, name: &str) -> Option<(usize, Option<Parameter>)> {
        let idx = self.parameters.iter().position(|(n, _)| n == name)?;
        let (_, param) = self.parameters.remove(idx);
        Some((idx, param))
    }

    /// Inserts an entry at `index` (clamped to the table length).
    pub fn insert_parameter(
        &mut self,
        index: usize,
        name: impl Into<String>,
        param: Option<Parameter>,
    ) {
        let index = index.min(self.parameters.len());
        self.parameters.insert(index, (name.into(), param));
    }

    // =========================================================================
    // Children
    // =========================================================================

    /// Adds a named child module.
    pub fn add_module(&mut self, name: impl Into<String>, module: Module) {
        let name = name.into();
        match self.children.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = module,
            None => self.children.push((name, module)),
        }
    }

    /// Builder form of [`add_module`](Self::add_module).
    #[must_use]
    pub fn with_module(mut self, name: impl Into<String>, module: Module) -> Self {
        self.add_module(name, module);
        self
    }

    /// Returns the direct child `name`.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Module> {
        self.children.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }

    /// Returns the direct child `name` mutably.
    pub fn child_mut(&mut self, name: &str) -> Option<&mut Module> {
        self.children
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m)
    }

    /// Direct children in declaration order.
    #[must_use]
    pub fn children(&self) -> &[(String, Module)] {
        &self.children
    }

    /// Resolves a dotted path such as `encoder.0`; the empty path is `self`.
    #[must_use]
    pub fn get_submodule(&self, path: &str) -> Option<&Module> {
        if path.is_empty() {
            return Some(self);
        }
        path.split('.').try_fold(self, |m, name| m.child(name))
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    /// Looks `name` up among parameters, then children.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<Attribute<'_>> {
        if let Some((_, param)) = self.parameters.iter().find(|(n, _)| n == name) {
            return Some(match param {
                Some(p) => Attribute::Parameter(p),
                None => Attribute::Empty,
            });
        }
        self.child(name).map(Attribute::Module)
    }

    /// Returns true if `name` is a parameter slot or child.
    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// All modules in pre-order with their dotted paths; the root is `""`.
    #[must_use]
    pub fn named_modules(&self) -> Vec<(String, &Module)> {
        let mut out = Vec::new();
        self.collect_modules(String::new(), &mut out);
        out
    }

    fn collect_modules<'a>(&'a self, path: String, out: &mut Vec<(String, &'a Module)>) {
        out.push((path.clone(), self));
        for (name, child) in &self.children {
            child.collect_modules(join_path(&path, name), out);
        }
    }

    /// All parameters with qualified names, each distinct parameter once at
    /// the first path it is reachable by.
    #[must_use]
    pub fn named_parameters(&self) -> Vec<(String, Parameter)> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (path, module) in self.named_modules() {
            for (name, param) in &module.parameters {
                if let Some(p) = param {
                    if seen.insert(p.id()) {
                        out.push((join_path(&path, name), p.clone()));
                    }
                }
            }
        }
        out
    }

    /// Visits every module in pre-order, stopping at the first error.
    ///
    /// The callback for a node runs before any of its children are visited.
    pub fn for_each_module_mut<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&str, &mut Module) -> Result<()>,
    {
        self.visit_mut("", &mut f)
    }

    fn visit_mut<F>(&mut self, path: &str, f: &mut F) -> Result<()>
    where
        F: FnMut(&str, &mut Module) -> Result<()>,
    {
        f(path, self)?;
        for (name, child) in &mut self.children {
            child.visit_mut(&join_path(path, name), f)?;
        }
        Ok(())
    }

    // =========================================================================
    // Forward
    // =========================================================================

    /// Runs the forward computation followed by every hook in registration
    /// order.
    pub fn forward(&self, input: &TensorValue) -> Result<TensorValue> {
        let forward = self.forward_fn.as_ref().ok_or_else(|| {
            Error::invalid_operation(format!("module {} has no forward", self.kind))
        })?;

        let mut output = forward(self, input)?;
        for (_, hook) in &self.hooks {
            if let Some(replaced) = hook(self, input, &output)? {
                output = replaced;
            }
        }
        Ok(output)
    }

    /// Registers a hook run after every forward.
    pub fn register_forward_hook<F>(&mut self, hook: F) -> HookHandle
    where
        F: Fn(&Module, &TensorValue, &TensorValue) -> Result<Option<TensorValue>>
            + Send
            + Sync
            + 'static,
    {
        let handle = HookHandle(self.next_hook_id);
        self.next_hook_id += 1;
        self.hooks.push((handle, Arc::new(hook)));
        trace!(module = %self.kind, hook = handle.0, "forward hook registered");
        handle
    }

    /// Removes a hook; returns false if it was not registered here.
    pub fn remove_hook(&mut self, handle: HookHandle) -> bool {
        let before = self.hooks.len();
        self.hooks.retain(|(h, _)| *h != handle);
        self.hooks.len() != before
    }

    /// Number of registered hooks.
    #[must_use]
    pub fn num_hooks(&self) -> usize {
        self.hooks.len()
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("kind", &self.kind)
            .field("parameters", &self.parameters)
            .field("children", &self.children)
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

// =============================================================================
// Tests
// =============================================================================
