//! Periodic usage events while a billing session is running.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::session::{BillingSessionCoordinator, SessionState};

/// Background ticker calling [`BillingSessionCoordinator::report_usage_event`]
/// every `interval` while the session is running.
///
/// Holds only a weak reference: the ticker exits on its own once the
/// coordinator is dropped.
pub struct UsageHeartbeat {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl UsageHeartbeat {
    pub fn start(coordinator: &Arc<BillingSessionCoordinator>, interval: Duration) -> Self {
        let weak: Weak<BillingSessionCoordinator> = Arc::downgrade(coordinator);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = std::thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    let Some(coordinator) = weak.upgrade() else {
                        log::debug!("Billing coordinator dropped; heartbeat exiting");
                        break;
                    };
                    if coordinator.state() == SessionState::Running {
                        coordinator.report_usage_event();
                    }
                }
                // Explicit stop, or the heartbeat handle was dropped.
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        log::debug!("Usage heartbeat started ({:?})", interval);
        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop the ticker and wait for its thread to exit.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("Usage heartbeat thread panicked");
            }
        }
    }
}

impl Drop for UsageHeartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendRequest, RecordingBackend};
    use crate::session::SessionType;
    use std::time::Instant;

    const TICK: Duration = Duration::from_millis(20);

    fn setup() -> (Arc<RecordingBackend>, Arc<BillingSessionCoordinator>) {
        let backend = Arc::new(RecordingBackend::auto_succeed());
        let coordinator = Arc::new(BillingSessionCoordinator::new(backend.clone()));
        (backend, coordinator)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn reports_while_running() {
        let (backend, coordinator) = setup();
        coordinator.begin_session(SessionType::FreeDrive);
        let baseline = backend.count(BackendRequest::UsageEvent);

        let mut heartbeat = UsageHeartbeat::start(&coordinator, TICK);
        assert!(wait_until(
            || backend.count(BackendRequest::UsageEvent) >= baseline + 2
        ));
        heartbeat.stop();
    }

    #[test]
    fn silent_while_not_running() {
        let (backend, coordinator) = setup();
        coordinator.begin_session(SessionType::FreeDrive);
        coordinator.pause_session();
        let baseline = backend.count(BackendRequest::UsageEvent);

        let mut heartbeat = UsageHeartbeat::start(&coordinator, TICK);
        std::thread::sleep(TICK * 5);
        heartbeat.stop();

        assert_eq!(backend.count(BackendRequest::UsageEvent), baseline);
    }

    #[test]
    fn stop_ends_the_thread() {
        let (backend, coordinator) = setup();
        coordinator.begin_session(SessionType::FreeDrive);

        let mut heartbeat = UsageHeartbeat::start(&coordinator, TICK);
        assert!(heartbeat.is_running());
        heartbeat.stop();
        assert!(!heartbeat.is_running());

        let after_stop = backend.count(BackendRequest::UsageEvent);
        std::thread::sleep(TICK * 3);
        assert_eq!(backend.count(BackendRequest::UsageEvent), after_stop);
    }

    #[test]
    fn exits_when_coordinator_dropped() {
        let (_, coordinator) = setup();
        let heartbeat = UsageHeartbeat::start(&coordinator, TICK);

        drop(coordinator);

        assert!(wait_until(|| !heartbeat.is_running()));
    }
}
