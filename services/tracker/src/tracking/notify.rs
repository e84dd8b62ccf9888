//! services/tracker/src/tracking/notify.rs
//!
//! User-facing failure notification, shown once per failure class to avoid
//! notification storms.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use xapi_core::domain::Notification;
use xapi_core::ports::Notifier;

/// The failure classes a notification can be raised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    Initialize,
    Statement,
    State,
}

fn connection_notification() -> Notification {
    Notification {
        title: "LRS not available".to_string(),
        body: "We were unable to connect to your Learning Record Store (LRS). \
               This means that your progress cannot be recorded."
            .to_string(),
        confirm_text: "OK".to_string(),
    }
}

/// Wraps the host's notifier with the `_lrsFailureBehaviour` policy and the
/// once-per-class dampening.
pub struct FailureNotifier {
    notifier: Arc<dyn Notifier>,
    enabled: bool,
    shown: Mutex<HashSet<FailureClass>>,
}

impl FailureNotifier {
    pub fn new(notifier: Arc<dyn Notifier>, enabled: bool) -> Self {
        Self {
            notifier,
            enabled,
            shown: Mutex::new(HashSet::new()),
        }
    }

    /// Raises the connection alert for `class` unless it has already been
    /// shown or notifications are configured off.
    pub fn failure(&self, class: FailureClass) {
        if !self.enabled {
            return;
        }

        let mut shown = self.shown.lock().expect("notifier poisoned");
        if shown.insert(class) {
            self.notifier.alert(&connection_notification());
        }
    }
}
