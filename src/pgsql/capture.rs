use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether native connect diagnostics are currently being captured verbatim.
#[derive(Debug, Clone, Default)]
pub(crate) struct CaptureFlag(Arc<AtomicBool>);

impl CaptureFlag {
    pub(crate) fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Turns capture on for its lifetime and restores the previous state on drop,
/// including early returns through `?`.
#[must_use = "capture ends when the guard is dropped"]
pub(crate) struct DiagnosticCapture {
    flag: CaptureFlag,
    previous: bool,
}

impl DiagnosticCapture {
    pub(crate) fn enable(flag: &CaptureFlag) -> Self {
        let previous = flag.0.swap(true, Ordering::AcqRel);
        Self {
            flag: flag.clone(),
            previous,
        }
    }
}

impl Drop for DiagnosticCapture {
    fn drop(&mut self) {
        self.flag.0.store(self.previous, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_on_every_exit() {
        let flag = CaptureFlag::default();
        let attempt = |fail: bool| -> Result<(), ()> {
            let _capture = DiagnosticCapture::enable(&flag);
            assert!(flag.is_active());
            if fail {
                return Err(());
            }
            Ok(())
        };
        assert!(attempt(true).is_err());
        assert!(!flag.is_active());
        assert!(attempt(false).is_ok());
        assert!(!flag.is_active());
    }

    #[test]
    fn nested_guards_keep_outer_state() {
        let flag = CaptureFlag::default();
        let outer = DiagnosticCapture::enable(&flag);
        {
            let _inner = DiagnosticCapture::enable(&flag);
        }
        assert!(flag.is_active());
        drop(outer);
        assert!(!flag.is_active());
    }
}
