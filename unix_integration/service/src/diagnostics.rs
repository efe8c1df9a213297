//! Per request invocation handle. Carries the cancellation token for the request and the
//! channel over which diagnostics lines are streamed back to the caller.

use std::fmt::Display;
use std::sync::Arc;

use realmd_common::error::RealmError;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

struct InvocationInner {
    operation: Option<String>,
    cancel: CancellationToken,
    sink: Option<UnboundedSender<String>>,
}

#[derive(Clone)]
pub struct Invocation {
    inner: Arc<InvocationInner>,
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("operation", &self.inner.operation)
            .field("cancelled", &self.inner.cancel.is_cancelled())
            .finish()
    }
}

impl Invocation {
    pub fn new(operation: Option<String>, sink: Option<UnboundedSender<String>>) -> Self {
        Invocation {
            inner: Arc::new(InvocationInner {
                operation,
                cancel: CancellationToken::new(),
                sink,
            }),
        }
    }

    /// An invocation with nobody listening, used for startup and refresh work.
    pub fn detached() -> Self {
        Invocation::new(None, None)
    }

    pub fn operation(&self) -> Option<&str> {
        self.inner.operation.as_deref()
    }

    /// True when both handles belong to the same request.
    pub fn is_same(&self, other: &Invocation) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn send(&self, line: String) {
        if let Some(sink) = &self.inner.sink {
            // The receiver goes away when the client disconnects, that's fine.
            let _ = sink.send(line);
        }
    }

    pub fn info<S: AsRef<str>>(&self, msg: S) {
        let msg = msg.as_ref();
        info!(diagnostics = %msg);
        self.send(format!(" * {}", msg));
    }

    pub fn warn<S: AsRef<str>>(&self, msg: S) {
        let msg = msg.as_ref();
        warn!(diagnostics = %msg);
        self.send(format!(" ! {}", msg));
    }

    pub fn error<E: Display, S: AsRef<str>>(&self, err: &E, msg: S) {
        let msg = msg.as_ref();
        error!(%err, diagnostics = %msg);
        self.send(format!(" ! {}: {}", msg, err));
    }

    /// Raw output from an external command, forwarded verbatim line by line.
    pub fn output(&self, output: &str) {
        for line in output.lines() {
            debug!(output = %line);
            self.send(line.to_string());
        }
    }

    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancel.cancelled()
    }

    pub fn check_cancelled(&self) -> Result<(), RealmError> {
        if self.is_cancelled() {
            Err(RealmError::cancelled())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn test_diagnostics_are_streamed() {
        sketching::test_init();
        let (tx, mut rx) = unbounded_channel();
        let inv = Invocation::new(Some("op-1".to_string()), Some(tx));
        inv.info("Looking up domain");
        inv.output("line one\nline two\n");
        drop(inv);

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        assert_eq!(
            lines,
            vec![
                " * Looking up domain".to_string(),
                "line one".to_string(),
                "line two".to_string()
            ]
        );
    }

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let inv = Invocation::detached();
        let other = inv.clone();
        assert!(other.check_cancelled().is_ok());
        assert!(inv.is_same(&other));
        assert!(!inv.is_same(&Invocation::detached()));
        inv.cancel();
        assert_eq!(other.check_cancelled(), Err(RealmError::cancelled()));
    }
}
