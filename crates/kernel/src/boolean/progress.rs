use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::report::BooleanError;

/// The five pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Registry,
    Interference,
    PaveBlocks,
    Classification,
    Build,
}

type Observer = Arc<dyn Fn(Stage) + Send + Sync>;

/// Cooperative cancellation and progress reporting.
///
/// Clones share the same flag, so a token handed to another thread can
/// cancel a running operation.
#[derive(Clone, Default)]
pub struct ProgressToken {
    cancelled: Arc<AtomicBool>,
    observer: Option<Observer>,
}

impl fmt::Debug for ProgressToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressToken")
            .field("cancelled", &self.is_cancelled())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl ProgressToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token whose observer is called at every stage and batch checkpoint.
    pub fn with_observer(observer: impl Fn(Stage) + Send + Sync + 'static) -> Self {
        Self {
            cancelled: Arc::default(),
            observer: Some(Arc::new(observer)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Checkpoint: notifies the observer, then fails if cancellation was requested.
    pub fn check(&self, stage: Stage) -> Result<(), BooleanError> {
        if let Some(observer) = &self.observer {
            observer(stage);
        }
        if self.is_cancelled() {
            debug!(?stage, "cancellation observed");
            return Err(BooleanError::Cancelled { stage });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn clones_share_cancellation() {
        let token = ProgressToken::new();
        let other = token.clone();
        assert!(token.check(Stage::Registry).is_ok());
        other.cancel();
        assert_eq!(
            token.check(Stage::Build),
            Err(BooleanError::Cancelled { stage: Stage::Build })
        );
    }

    #[test]
    fn observer_sees_checkpoints() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let token = ProgressToken::with_observer(move |s| sink.lock().unwrap().push(s));
        token.check(Stage::Registry).unwrap();
        token.check(Stage::Interference).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Stage::Registry, Stage::Interference]);
    }
}
