// Panic isolation for handler execution
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::error;

/// Result of a panic-guarded execution
#[derive(Debug)]
pub enum PanicGuardResult<T> {
    /// Execution completed
    Success(T),
    /// Execution panicked
    Panicked(String),
}

/// Await a future with panic isolation
///
/// A panic inside the future is caught and returned as
/// `PanicGuardResult::Panicked`, so a faulty handler cannot take its worker
/// down. The future runs on the caller's task: aborting the caller also
/// drops the future.
///
/// # Example
/// ```text
/// let result = execute_guarded(async {
///     panic!("test panic");
/// }).await;
///
/// if let PanicGuardResult::Panicked(msg) = result {
///     println!("Caught panic: {}", msg);
/// }
/// ```
pub async fn execute_guarded<F, T>(future: F) -> PanicGuardResult<T>
where
    F: Future<Output = T>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => PanicGuardResult::Success(result),
        Err(panic_info) => {
            let panic_msg = panic_message(panic_info.as_ref());
            error!(panic_msg = %panic_msg, "Handler panicked");
            PanicGuardResult::Panicked(panic_msg)
        }
    }
}

/// Extract a readable message from a panic payload
pub fn panic_message(panic_info: &(dyn Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success_passes_through() {
        let result = execute_guarded(async { 42 }).await;
        assert!(matches!(result, PanicGuardResult::Success(42)));
    }

    #[tokio::test]
    async fn test_str_panic_caught() {
        let result: PanicGuardResult<()> = execute_guarded(async {
            panic!("boom");
        })
        .await;
        match result {
            PanicGuardResult::Panicked(msg) => assert_eq!(msg, "boom"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_formatted_panic_caught_after_await() {
        let result: PanicGuardResult<()> = execute_guarded(async {
            tokio::task::yield_now().await;
            panic!("code {}", 7);
        })
        .await;
        match result {
            PanicGuardResult::Panicked(msg) => assert_eq!(msg, "code 7"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
