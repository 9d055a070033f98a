//! Worker pool selection for the resampling loop.
//!
//! With no explicit worker count the work runs on rayon's global pool,
//! which sizes itself to the available processing units. An explicit count
//! gets a dedicated pool for the duration of the call.

use crate::error::Result;

#[cfg(feature = "parallel")]
use crate::error::Error;

/// Execute a parallel operation on a pool with `threads` workers.
///
/// # Errors
///
/// [`Error::Configuration`] if the dedicated pool cannot be built.
#[cfg(feature = "parallel")]
pub fn install<OP, R>(threads: Option<usize>, op: OP) -> Result<R>
where
    OP: FnOnce() -> R + Send,
    R: Send,
{
    match threads {
        None => Ok(op()),
        Some(n) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| Error::config(format!("failed to build worker pool: {}", e)))?;
            Ok(pool.install(op))
        }
    }
}

/// Execute the operation directly; the worker count is ignored.
#[cfg(not(feature = "parallel"))]
pub fn install<OP, R>(_threads: Option<usize>, op: OP) -> Result<R>
where
    OP: FnOnce() -> R,
{
    Ok(op())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_runs_operation() {
        assert_eq!(install(None, || 2 + 2).unwrap(), 4);
        assert_eq!(install(Some(2), || "done").unwrap(), "done");
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_dedicated_pool_size() {
        let threads = install(Some(3), rayon::current_num_threads).unwrap();
        assert_eq!(threads, 3);
    }
}
