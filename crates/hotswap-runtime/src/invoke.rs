//! Operation resolution and invocation against a unit handle

use std::panic::{self, AssertUnwindSafe};
use tracing::debug;

use hotswap_kernel::{Args, HotswapError, HotswapResult, SymbolKind, UnitHandle, Value};

use crate::loader::native::panic_message;

/// Check that `operation` names a callable symbol of the handle
pub fn resolve_operation(handle: &UnitHandle, operation: &str) -> HotswapResult<()> {
    match handle.namespace().lookup(operation) {
        Some(SymbolKind::Operation) => Ok(()),
        Some(SymbolKind::Value) => Err(HotswapError::OperationNotCallable {
            unit: handle.unit().to_string(),
            operation: operation.to_string(),
        }),
        None => Err(HotswapError::OperationNotFound {
            unit: handle.unit().to_string(),
            operation: operation.to_string(),
        }),
    }
}

/// Resolve and call an operation. Errors and panics raised by the
/// operation become [`HotswapError::InvocationFailure`].
pub fn call_operation(handle: &UnitHandle, operation: &str, args: &Args) -> HotswapResult<Value> {
    resolve_operation(handle, operation)?;
    debug!("Invoking {}.{}", handle.unit(), operation);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        handle.namespace().call(operation, args)
    }));

    let failure = |reason: String| HotswapError::InvocationFailure {
        unit: handle.unit().to_string(),
        operation: operation.to_string(),
        reason,
    };

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(reason)) => Err(failure(reason)),
        Err(payload) => Err(failure(panic_message(payload.as_ref()))),
    }
}
