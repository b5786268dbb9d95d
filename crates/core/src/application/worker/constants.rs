// Worker constants (no magic values)
use std::time::Duration;

/// Sleep after a store error before the worker polls again (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Upper bound on the error recovery sleep when the poll interval is longer
pub const MAX_ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(5);

/// Maximum length of an error message persisted with an envelope
pub const MAX_ERROR_MESSAGE_LEN: usize = 2048;
