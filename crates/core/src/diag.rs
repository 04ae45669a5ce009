//! Diagnostics: last-error slot and global error callback.
//!
//! Errors in colloquy propagate through `Result` values; this module is a
//! compatibility layer for callers that want a queryable "most recent
//! error" per thread or a process-wide error hook. Fallible facade
//! operations record their outcome here: failures fill the thread-local
//! slot and notify the callback once, successes clear the slot.

use std::cell::RefCell;
use std::sync::Mutex;
use crate::error::{Error, ErrorKind};

thread_local! {
    static LAST_ERROR: RefCell<Option<(ErrorKind, String)>> = const { RefCell::new(None) };
}

/// The global error callback, replaced atomically under an internal lock.
type ErrorCallback = Box<dyn Fn(ErrorKind, &str) + Send + Sync>;

static ERROR_CALLBACK: Mutex<Option<ErrorCallback>> = Mutex::new(None);

/// Record a failed operation: fill the thread-local slot and invoke the
/// global callback once.
pub fn record(error: &Error) {
    let kind = error.kind();
    let message = error.to_string();

    LAST_ERROR.with(|slot| {
        *slot.borrow_mut() = Some((kind, message.clone()));
    });

    if let Ok(guard) = ERROR_CALLBACK.lock() {
        if let Some(callback) = guard.as_ref() {
            callback(kind, &message);
        }
    }
}

/// Clear the thread-local slot (a successful operation).
pub fn clear() {
    LAST_ERROR.with(|slot| {
        *slot.borrow_mut() = None;
    });
}

/// The most recent error recorded on this thread, if any. The message is
/// valid until the thread's next recorded operation.
pub fn last_error() -> Option<(ErrorKind, String)> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Install the global error callback, replacing any previous one.
pub fn set_error_callback(callback: impl Fn(ErrorKind, &str) + Send + Sync + 'static) {
    if let Ok(mut guard) = ERROR_CALLBACK.lock() {
        *guard = Some(Box::new(callback));
    }
}

/// Remove the global error callback.
pub fn clear_error_callback() {
    if let Ok(mut guard) = ERROR_CALLBACK.lock() {
        *guard = None;
    }
}

/// Record the outcome of a facade operation: failures fill the slot and
/// fire the callback, successes clear the slot.
pub fn track<T>(result: &Result<T, Error>) {
    match result {
        Ok(_) => clear(),
        Err(e) => record(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn slot_tracks_failures_and_clears_on_success() {
        let err = Error::Backend(BackendError::Inference("decode failed".into()));
        record(&err);
        let (kind, message) = last_error().expect("slot should be filled");
        assert_eq!(kind, ErrorKind::Inference);
        assert!(message.contains("decode failed"));

        let ok: Result<(), Error> = Ok(());
        track(&ok);
        assert!(last_error().is_none());
    }

    #[test]
    fn callback_fires_once_per_recorded_error() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(None));
        {
            let count = count.clone();
            let seen = seen.clone();
            // Match on the unique path so errors recorded by concurrently
            // running tests don't perturb the count.
            set_error_callback(move |kind, message| {
                if message.contains("/nope.gguf") {
                    count.fetch_add(1, Ordering::SeqCst);
                    *seen.lock().unwrap() = Some((kind, message.to_string()));
                }
            });
        }

        let err = Error::Backend(BackendError::ModelNotFound(
            "Model file not found: /nope.gguf".into(),
        ));
        record(&err);
        clear_error_callback();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let (kind, message) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(kind, ErrorKind::ModelNotFound);
        assert!(message.contains("not found"));
    }
}
