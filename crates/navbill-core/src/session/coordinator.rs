//! BillingSessionCoordinator - reference-counted billing session lifecycle.
//!
//! Sessions nest: a free-drive session may be embedded inside an
//! active-guidance one, so every `begin_session` must be matched by a
//! `stop_session` and only the last stop closes the backend session.
//!
//! The lock guarding (state, count, type) is held only for the in-memory
//! transition. Backend requests go out after it is released, and their
//! completions take it again before touching shared state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::broadcast;

use super::state::{SessionSnapshot, SessionState, SessionType};
use crate::backend::{BackendOperation, BillingBackend, BillingError, BillingResult};
use crate::event_bus::{BillingEvent, BillingEventBus};

/// A state record before and after one mutation.
#[derive(Debug, Clone, Copy)]
struct Transition {
    previous: SessionSnapshot,
    current: SessionSnapshot,
}

struct Shared {
    session: Mutex<SessionSnapshot>,
    backend: Arc<dyn BillingBackend>,
    events: Arc<BillingEventBus>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionSnapshot> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, mutate: impl FnOnce(&mut SessionSnapshot)) -> Transition {
        let mut session = self.lock();
        let previous = *session;
        mutate(&mut *session);
        Transition {
            previous,
            current: *session,
        }
    }

    fn publish(&self, transition: Transition) {
        if transition.previous.state != transition.current.state {
            log::debug!(
                "Billing session {} -> {} (active: {})",
                transition.previous.state,
                transition.current.state,
                transition.current.active_count
            );
            self.events.emit(BillingEvent::StateChanged {
                previous: transition.previous.state,
                current: transition.current.state,
                active_count: transition.current.active_count,
            });
        }
    }

    fn backend_failed(&self, operation: BackendOperation, err: &BillingError) {
        self.events.emit(BillingEvent::BackendFailed {
            operation,
            reason: err.to_string(),
        });
    }

    /// Fire the usage event and the open request for `session_type`.
    fn request_session(self: &Arc<Self>, session_type: SessionType) {
        self.report_usage();

        let weak = Arc::downgrade(self);
        self.backend.open_session(
            session_type,
            Box::new(move |result: BillingResult| {
                if let Err(err) = result {
                    if let Some(shared) = weak.upgrade() {
                        shared.on_open_failed(session_type, err);
                    }
                }
            }),
        );
    }

    fn report_usage(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.backend.report_usage_event(Box::new(move |result: BillingResult| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            match result {
                Ok(()) => {
                    shared.events.emit(BillingEvent::UsageReported);
                }
                Err(err) => {
                    log::warn!("Billing usage event failed: {}", err);
                    shared.events.emit(BillingEvent::UsageReportFailed {
                        reason: err.to_string(),
                    });
                }
            }
        }));
    }

    /// Opening never partially succeeds: any failure means no session.
    fn on_open_failed(&self, session_type: SessionType, err: BillingError) {
        log::warn!("Failed to open {} billing session: {}", session_type, err);
        self.backend_failed(BackendOperation::OpenSession, &err);
        let transition = self.transition(|session| session.state = SessionState::Stopped);
        self.publish(transition);
    }

    /// Drop to stopped, then re-open the last known session type if a
    /// logical session is still outstanding. The count is not incremented:
    /// it already accounts for that session.
    fn on_resume_failed(self: &Arc<Self>, err: BillingError) {
        log::warn!("Failed to resume billing session: {}", err);
        self.backend_failed(BackendOperation::ResumeSession, &err);

        let (stopped, recovery) = {
            let mut session = self.lock();
            let previous = *session;
            session.state = SessionState::Stopped;
            let stopped = Transition {
                previous,
                current: *session,
            };

            let outstanding = session.active_count > 0;
            let last_type = session.session_type;
            let recovery = match last_type {
                Some(session_type) if outstanding => {
                    session.state = SessionState::Running;
                    Some((
                        session_type,
                        Transition {
                            previous: stopped.current,
                            current: *session,
                        },
                    ))
                }
                _ => None,
            };
            (stopped, recovery)
        };

        self.publish(stopped);
        match recovery {
            Some((session_type, restarted)) => {
                log::info!("Re-opening {} billing session after failed resume", session_type);
                self.publish(restarted);
                self.events.emit(BillingEvent::Recovered { session_type });
                self.request_session(session_type);
            }
            None => {
                log::debug!("No outstanding billing session to recover after failed resume");
            }
        }
    }
}

/// Thread-safe billing session state machine.
///
/// All operations are fire-and-forget: backend failures never reach the
/// caller and are handled internally.
pub struct BillingSessionCoordinator {
    shared: Arc<Shared>,
}

impl BillingSessionCoordinator {
    /// Create a coordinator with its own event bus.
    pub fn new(backend: Arc<dyn BillingBackend>) -> Self {
        Self::with_event_bus(backend, Arc::new(BillingEventBus::new()))
    }

    pub fn with_event_bus(backend: Arc<dyn BillingBackend>, events: Arc<BillingEventBus>) -> Self {
        Self {
            shared: Arc::new(Shared {
                session: Mutex::new(SessionSnapshot::default()),
                backend,
                events,
            }),
        }
    }

    /// Begin a (possibly nested) billing session.
    ///
    /// Sets state to running immediately. If the backend later fails to open
    /// the session, the state drops to stopped.
    pub fn begin_session(&self, session_type: SessionType) {
        let transition = self.shared.transition(|session| {
            session.active_count += 1;
            session.state = SessionState::Running;
            session.session_type = Some(session_type);
        });
        log::info!(
            "Beginning {} billing session (active: {})",
            session_type,
            transition.current.active_count
        );
        self.shared.publish(transition);
        self.shared.request_session(session_type);
    }

    /// End one logical session. The backend session is closed only when the
    /// last outstanding session stops.
    pub fn stop_session(&self) {
        let transition = {
            let mut session = self.shared.lock();
            if session.active_count == 0 {
                None
            } else {
                let previous = *session;
                session.active_count -= 1;
                if session.active_count == 0 {
                    session.state = SessionState::Stopped;
                }
                Some(Transition {
                    previous,
                    current: *session,
                })
            }
        };

        let Some(transition) = transition else {
            log::warn!("stop_session called with no active billing session; ignoring");
            return;
        };

        self.shared.publish(transition);
        if transition.current.active_count == 0 {
            log::info!("Closing billing session");
            self.shared.backend.close_session();
        } else {
            log::debug!(
                "Billing session still held by {} caller(s)",
                transition.current.active_count
            );
        }
    }

    pub fn pause_session(&self) {
        let transition = self
            .shared
            .transition(|session| session.state = SessionState::Paused);
        self.shared.publish(transition);
        self.shared.backend.pause_session();
    }

    /// Resume billing. A backend failure is healed by re-opening a session of
    /// the last requested type.
    pub fn resume_session(&self) {
        let transition = self
            .shared
            .transition(|session| session.state = SessionState::Running);
        self.shared.publish(transition);

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        self.shared.backend.resume_session(Box::new(move |result: BillingResult| {
            if let Err(err) = result {
                if let Some(shared) = weak.upgrade() {
                    shared.on_resume_failed(err);
                }
            }
        }));
    }

    /// Send a best-effort usage event. Failures are logged and never change
    /// the session state.
    pub fn report_usage_event(&self) {
        self.shared.report_usage();
    }

    /// The backend's session token, if it has a valid one.
    pub fn session_token(&self) -> Option<String> {
        self.shared
            .backend
            .current_token()
            .filter(|token| !token.is_empty())
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn active_count(&self) -> usize {
        self.shared.lock().active_count
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        *self.shared.lock()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BillingEvent> {
        self.shared.events.subscribe()
    }

    pub fn event_bus(&self) -> Arc<BillingEventBus> {
        Arc::clone(&self.shared.events)
    }
}
