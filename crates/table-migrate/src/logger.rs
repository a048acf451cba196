//! Log sink for user-facing migration messages.
//!
//! Every message goes to `tracing`; a caller may additionally register a
//! callback (the CLI echoes to stdout in verbose mode).

use std::fmt;
use std::sync::Arc;

use tracing::info;

/// Callback receiving one message per call.
pub type LogCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Cloneable handle shared by the coordinator and both backends.
#[derive(Clone, Default)]
pub struct Logger {
    callback: Option<LogCallback>,
}

impl Logger {
    /// Logger that only emits `tracing` events.
    pub fn new() -> Self {
        Self::default()
    }

    /// Logger that also forwards every message to `callback`.
    pub fn with_callback(callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    pub fn log(&self, message: &str) {
        info!("{}", message);
        if let Some(cb) = &self.callback {
            cb(message);
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_callback_receives_messages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let logger = Logger::with_callback(move |m| sink.lock().unwrap().push(m.to_string()));
        logger.log("migrating users");
        logger.clone().log("done");
        assert_eq!(*seen.lock().unwrap(), vec!["migrating users", "done"]);
    }
}
