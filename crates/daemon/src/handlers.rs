//! Built-in task handlers

use jobq_core::{HandlerError, JobService, Result, TaskPayload};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Task type of the welcome email
pub const TASK_WELCOME_EMAIL: &str = "welcome_email";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WelcomeEmail {
    pub to: String,
}

/// Decode the payload and deliver the email.
///
/// A payload that does not decode, or an address without `@`, is a terminal
/// failure; retrying cannot fix it.
pub async fn send_welcome_email(payload: TaskPayload) -> std::result::Result<(), HandlerError> {
    let email: WelcomeEmail = payload.decode_json()?;
    if !email.to.contains('@') {
        return Err(HandlerError::terminal(format!(
            "invalid recipient address: '{}'",
            email.to
        )));
    }

    info!(to = %email.to, "Sending welcome email");
    Ok(())
}

/// Register every built-in handler
pub fn register_all(service: &JobService) -> Result<()> {
    service.register_fn(TASK_WELCOME_EMAIL, send_welcome_email)?;
    Ok(())
}
