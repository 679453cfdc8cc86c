use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Init,
    Import,
    Validate,
    Autofix,
    Manifest,
    OrphanSweep,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Init => "init",
            OperationKind::Import => "import",
            OperationKind::Validate => "validate",
            OperationKind::Autofix => "autofix",
            OperationKind::Manifest => "manifest",
            OperationKind::OrphanSweep => "orphan_sweep",
        }
    }
}

/// Progress sink injected by the caller. All methods default to no-ops, so
/// a unit-struct sink is always acceptable.
pub trait Reporter: Send + Sync {
    fn start_operation(&self, _kind: OperationKind, _target: &str) {}
    fn complete_operation(&self, _ok: bool, _detail: &str) {}
    fn report_progress(&self, _current: u64, _total: u64) {}
}

/// The always-acceptable null sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {}

/// Cooperative cancellation flag shared between the caller and the engine.
/// The engine polls it at bounded intervals; observing it trips every
/// in-flight operation with [`Error::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Poll point: errors out once the token has been triggered.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_trips_checkpoint() {
        let token = CancellationToken::new();
        assert!(token.checkpoint().is_ok());
        token.cancel();
        assert!(matches!(token.checkpoint(), Err(Error::Cancelled)));
        // Clones observe the same flag.
        assert!(token.clone().is_cancelled());
    }

    #[test]
    fn null_reporter_accepts_everything() {
        let sink = NullReporter;
        sink.start_operation(OperationKind::Import, "repo");
        sink.report_progress(1, 10);
        sink.complete_operation(true, "done");
    }
}
