//! Load Context - Scoped process-group override for deserialization
//!
//! While a [`ProcessGroupScope`] is alive, sharded and replicated values
//! rebuilt from saved state attach to its group instead of the default one.
//! Scopes do not nest: activating a second one on the same rank fails.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::cell::RefCell;

use shardwise_core::error::{Error, Result};
use tracing::trace;

use crate::process_group::{default_group, ProcessGroup};

// =============================================================================
// Thread-Local Override
// =============================================================================

thread_local! {
    /// Group installed by the active scope on this rank, if any.
    static CURRENT_PROCESS_GROUP: RefCell<Option<ProcessGroup>> = const { RefCell::new(None) };
}

/// Returns the group of the active scope, if any.
#[must_use]
pub fn active_process_group() -> Option<ProcessGroup> {
    CURRENT_PROCESS_GROUP.with(|slot| slot.borrow().clone())
}

/// Returns the group of the active scope, falling back to the default group.
pub fn current_process_group() -> Result<ProcessGroup> {
    match active_process_group() {
        Some(pg) => Ok(pg),
        None => default_group(),
    }
}

// =============================================================================
// ProcessGroupScope
// =============================================================================

/// RAII guard that keeps a process-group override active.
///
/// The override is cleared when the guard drops, including during unwinding.
///
/// # Example
/// ```rust
/// use shardwise_distributed::{load_with_process_group, current_process_group, ProcessGroup};
///
/// let pg = ProcessGroup::mock();
/// {
///     let _scope = load_with_process_group(&pg).unwrap();
///     assert!(current_process_group().unwrap().ptr_eq(&pg));
///     assert!(load_with_process_group(&pg).is_err());
/// }
/// assert!(load_with_process_group(&pg).is_ok());
/// ```
#[must_use = "the override is released as soon as the scope is dropped"]
pub struct ProcessGroupScope {
    _private: (),
}

impl Drop for ProcessGroupScope {
    fn drop(&mut self) {
        CURRENT_PROCESS_GROUP.with(|slot| slot.borrow_mut().take());
        trace!("process group override released");
    }
}

/// Installs `process_group` as the override until the returned guard drops.
pub fn load_with_process_group(process_group: &ProcessGroup) -> Result<ProcessGroupScope> {
    CURRENT_PROCESS_GROUP.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_some() {
            return Err(Error::Reentrancy {
                message: "ProcessGroup already set by previous load_with_process_group context"
                    .to_string(),
            });
        }
        *slot = Some(process_group.clone());
        Ok(())
    })?;

    trace!(rank = process_group.rank(), "process group override installed");
    Ok(ProcessGroupScope { _private: () })
}

/// Runs `f` with `process_group` installed as the override.
pub fn with_process_group<F, R>(process_group: &ProcessGroup, f: F) -> Result<R>
where
    F: FnOnce() -> R,
{
    let _scope = load_with_process_group(process_group)?;
    Ok(f())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_group::{destroy_process_group, init_process_group};
    use std::panic;

    #[test]
    fn test_scope_installs_and_releases() {
        let pg = ProcessGroup::mock();
        assert!(active_process_group().is_none());
        {
            let _scope = load_with_process_group(&pg).unwrap();
            assert!(active_process_group().unwrap().ptr_eq(&pg));
        }
        assert!(active_process_group().is_none());
    }

    #[test]
    fn test_nested_scope_is_rejected() {
        let pg = ProcessGroup::mock();
        let _scope = load_with_process_group(&pg).unwrap();

        let err = load_with_process_group(&ProcessGroup::mock()).err().unwrap();
        assert!(matches!(err, Error::Reentrancy { .. }));
        assert!(err.to_string().contains("already set"));

        // The first override is still in place.
        assert!(active_process_group().unwrap().ptr_eq(&pg));
    }

    #[test]
    fn test_scope_released_on_error_exit() {
        let pg = ProcessGroup::mock();
        let result: Result<()> = (|| {
            let _scope = load_with_process_group(&pg)?;
            Err(Error::invalid_input("boom"))
        })();
        assert!(result.is_err());
        assert!(active_process_group().is_none());
    }

    #[test]
    fn test_scope_released_on_panic() {
        let pg = ProcessGroup::mock();
        let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            let _scope = load_with_process_group(&pg).unwrap();
            panic!("inside scope");
        }));
        assert!(outcome.is_err());
        assert!(active_process_group().is_none());
    }

    #[test]
    fn test_current_falls_back_to_default() {
        destroy_process_group();
        assert!(matches!(
            current_process_group(),
            Err(Error::DefaultGroupNotInitialized)
        ));

        let default = ProcessGroup::mock();
        init_process_group(default.clone()).unwrap();
        assert!(current_process_group().unwrap().ptr_eq(&default));

        let scoped = ProcessGroup::mock();
        let seen = with_process_group(&scoped, || current_process_group().unwrap()).unwrap();
        assert!(seen.ptr_eq(&scoped));
        assert!(current_process_group().unwrap().ptr_eq(&default));

        destroy_process_group();
    }
}
