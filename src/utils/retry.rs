use std::time::Duration;

use crate::constants::{DEVICE_RETRY_ATTEMPTS, RETRY_DELAY};
use crate::errors::{FailureClass, SupError};

/// How many times to try, and how long to wait in between
#[derive(Debug, Clone, Copy)]
pub struct Policy {
    pub attempts: usize,
    pub delay: Duration,
}

impl Policy {
    pub const fn new(attempts: usize, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    pub const fn device() -> Self {
        Self::new(DEVICE_RETRY_ATTEMPTS, RETRY_DELAY)
    }
}

/// Calls `op` until it succeeds, fails with an error `retryable` rejects,
/// or `policy.attempts` is used up. Exhaustion yields `RetriesExhausted`
/// wrapping the last error.
pub fn retry<T, F, R>(
    operation: &str,
    policy: Policy,
    retryable: R,
    mut op: F,
) -> Result<T, SupError>
where
    F: FnMut() -> Result<T, SupError>,
    R: Fn(&SupError) -> bool,
{
    let mut attempt = 0;
    loop {
        attempt += 1;

        let err = match op() {
            Ok(value) => return Ok(value),
            Err(err) if !retryable(&err) => return Err(err),
            Err(err) => err,
        };

        if attempt >= policy.attempts {
            return Err(SupError::RetriesExhausted {
                operation: operation.to_string(),
                attempts: attempt,
                last: Box::new(err),
            });
        }

        tracing::warn!("{operation}: attempt {attempt}/{} failed: {err}", policy.attempts);
        std::thread::sleep(policy.delay);
    }
}

/// Retries `op` on `device` while it fails with a transient device error
pub fn retry_device<T, F>(device: &str, policy: Policy, op: F) -> Result<T, SupError>
where
    F: FnMut() -> Result<T, SupError>,
{
    retry(device, policy, is_transient, op).map_err(|err| match err {
        SupError::RetriesExhausted { attempts, last, .. } => SupError::TransientDevice {
            device: device.to_string(),
            attempts,
            last,
        },
        err => err,
    })
}

pub fn is_transient(err: &SupError) -> bool {
    err.is_class(FailureClass::TransientDevice)
}

pub fn is_permission(err: &SupError) -> bool {
    err.is_class(FailureClass::Permission)
}
