//! Panic recovery around user compute.
//!
//! A panicking compute function must fail its unit of work, not the process.

use crate::types::{Error, Result};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Run `operation`, turning a panic into `Error::Compute`.
///
/// # Example
/// ```
/// use pylon_core::engine::with_recovery;
///
/// let result: pylon_core::Result<u32> = with_recovery(|| Ok(7), "compute");
/// assert_eq!(result.unwrap(), 7);
/// ```
pub fn with_recovery<F, T>(operation: F, operation_name: &str) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    catch_unwind(AssertUnwindSafe(operation)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!(operation = operation_name, panic = %message, "compute panicked");
        Err(Error::compute(format!("panic in {}: {}", operation_name, message)))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic (no message)")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;

    #[test]
    fn test_with_recovery_success() {
        let result = with_recovery(|| Ok(42), "compute");
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_with_recovery_preserves_error() {
        let result: Result<()> = with_recovery(|| Err(Error::compute("bad row")), "compute");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("bad row"));
    }

    #[test]
    fn test_with_recovery_panic_str() {
        let result: Result<()> = with_recovery(
            || {
                panic!("index out of range");
            },
            "compute",
        );

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ComputeError);
        let err_msg = err.to_string();
        assert!(err_msg.contains("panic in compute"));
        assert!(err_msg.contains("index out of range"));
    }

    #[test]
    fn test_with_recovery_panic_string() {
        let result: Result<()> = with_recovery(
            || {
                panic!("{} rows rejected", 3);
            },
            "compute",
        );
        assert!(result.unwrap_err().to_string().contains("3 rows rejected"));
    }

    #[test]
    fn test_unknown_panic_payload() {
        let payload = std::panic::catch_unwind(|| std::panic::panic_any(17_u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "unknown panic (no message)");
    }
}
