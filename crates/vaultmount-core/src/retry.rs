//! Single-retry policy for unmounts that hit a busy mount point.
//!
//! The state machine is `Attempting -> Done | Waiting -> Attempting(retry) -> Done | BusyTimeout`.
//! The delay budget is taken on the first busy failure, so a second failure of
//! any kind ends the chain; at most two attempts are ever made.

use crate::classify::{self, BUSY_MARKER};
use crate::error::{ErrorKind, VaultmountError, VaultmountResult};
use crate::runner::{HelperFailure, HelperOutput};
use log::{debug, warn};
use std::future::Future;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyRetry {
    timeout: Duration,
}

#[derive(Debug)]
enum UnmountState {
    Attempting,
    Waiting(Duration),
}

impl BusyRetry {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Drive `attempt` until it succeeds, fails for a non-busy reason, or the single retry is spent.
    ///
    /// `attempt` receives the zero-based attempt number.
    pub async fn run<F, Fut>(&self, mount_point: &Path, mut attempt: F) -> VaultmountResult<()>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<HelperOutput, HelperFailure>>,
    {
        let mut budget = Some(self.timeout);
        let mut attempts = 0u32;
        let mut state = UnmountState::Attempting;

        loop {
            state = match state {
                UnmountState::Attempting => {
                    let outcome = attempt(attempts).await;
                    attempts += 1;
                    let failure = match outcome {
                        Ok(_) => {
                            debug!(
                                "unmount of {} finished after {attempts} attempt(s)",
                                mount_point.display()
                            );
                            return Ok(());
                        }
                        Err(failure) => failure,
                    };
                    match (budget.take(), classify::classify(&failure)) {
                        (None, _) => {
                            return Err(VaultmountError::BusyTimeout {
                                mount_point: mount_point.to_path_buf(),
                                timeout: self.timeout,
                                last: failure,
                            });
                        }
                        (Some(delay), ErrorKind::Busy) => {
                            warn!(
                                "{} reported `{BUSY_MARKER}`; retrying once in {delay:?}",
                                mount_point.display()
                            );
                            UnmountState::Waiting(delay)
                        }
                        (Some(_), _) => return Err(classify::into_error(failure)),
                    }
                }
                UnmountState::Waiting(delay) => {
                    tokio::time::sleep(delay).await;
                    UnmountState::Attempting
                }
            };
        }
    }
}

impl Default for BusyRetry {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::config::DEFAULT_BUSY_TIMEOUT_MS))
    }
}
