//! User notification side channel
//!
//! The pipeline reports recoverable conditions (permission denied, recording
//! too short, hands-free auto-disable) as plain user-facing text through a
//! single `notify` call. No structured error object crosses this boundary;
//! the embedding UI decides how to render the message (toast, banner, etc.).

/// Notice shown when microphone access is refused or no device exists.
pub const MSG_MICROPHONE_DENIED: &str = "Microphone access denied";

/// Notice shown when a capture was stopped before the minimum duration.
pub const MSG_HOLD_TO_RECORD: &str = "Hold the button to record";

/// Notice shown when hands-free mode turns itself off after a failure.
pub const MSG_HANDSFREE_DISABLED: &str = "Hands-free listening turned off";

/// Sink for user-facing notices.
pub trait Notifier: Send + Sync {
    /// Deliver one plain-text notice to the user.
    fn notify(&self, message: &str);
}

/// Default notifier that forwards notices to the tracing log.
///
/// Useful for headless deployments and tests; UI embeddings supply their
/// own implementation wired to a toast system.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str) {
        tracing::info!("user notice: {}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Notifier that records every message, for assertions.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub messages: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, message: &str) {
            self.messages.lock().push(message.to_string());
        }
    }

    #[test]
    fn test_recording_notifier_collects_messages() {
        let notifier = Arc::new(RecordingNotifier::default());
        notifier.notify(MSG_MICROPHONE_DENIED);
        notifier.notify(MSG_HOLD_TO_RECORD);

        let messages = notifier.messages.lock();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], MSG_MICROPHONE_DENIED);
    }

    #[test]
    fn test_tracing_notifier_does_not_panic() {
        TracingNotifier.notify("anything");
    }
}
