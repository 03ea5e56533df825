// Upload state ledger
// Uploaders report state changes here; the status reporter drains them
use crate::domain::{ArtifactId, ArtifactState};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct LedgerInner {
    pending: HashMap<ArtifactId, ArtifactState>,
    failures: Vec<String>,
    closed: bool,
}

/// Shared between upload tasks (writers) and one reporter (drainer)
///
/// Every drain empties the pending map, so each reported state is handed
/// out exactly once.
#[derive(Debug, Default)]
pub struct StateLedger {
    inner: Mutex<LedgerInner>,
}

impl StateLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn report(&self, id: impl Into<ArtifactId>, state: ArtifactState) {
        self.lock().pending.insert(id.into(), state);
    }

    /// Take everything reported since the last drain
    ///
    /// The flag is true once the ledger is closed; nothing more will arrive.
    pub fn drain(&self) -> (HashMap<ArtifactId, ArtifactState>, bool) {
        let mut inner = self.lock();
        (std::mem::take(&mut inner.pending), inner.closed)
    }

    /// No further reports will be made
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn record_failure(&self, message: impl Into<String>) {
        self.lock().failures.push(message.into());
    }

    pub fn failures(&self) -> Vec<String> {
        self.lock().failures.clone()
    }
}
