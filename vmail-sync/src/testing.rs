//! Test doubles for the reload side. The store side has
//! [`vmail_store::MemStore`].
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::reload::{ReloadError, ReloadTrigger, ServiceFailure};

/// Counts reloads; fails every one of them when built with [`CountingReload::failing`].
#[derive(Default)]
pub struct CountingReload {
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl CountingReload {
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(true),
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReloadTrigger for CountingReload {
    async fn reload(&self) -> Result<(), ReloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.fail.load(Ordering::SeqCst) {
            true => Err(ReloadError::Services(vec![ServiceFailure {
                service: "counting".into(),
                error: ReloadError::NonZeroExit {
                    command: "reload".into(),
                    code: 1,
                    stderr: "injected failure".into(),
                },
            }])),
            false => Ok(()),
        }
    }
}
