//! BillingContext - the shared billing handle for the whole process.
//!
//! Built once at application start-up and passed to whatever needs billing,
//! instead of reaching for a global. Tests build their own context with a
//! substituted backend.
//!
//! ```text
//!               ┌──────────────────────────────┐
//!               │        BillingContext        │
//!               ├──────────────────────────────┤
//!               │  - BillingSessionCoordinator │
//!               │  - BillingBackend            │
//!               │  - BillingEventBus           │
//!               │  - UsageHeartbeat (optional) │
//!               │  - BillingConfig             │
//!               └──────────────┬───────────────┘
//!                              │
//!            ┌─────────────────┼─────────────────┐
//!            ▼                 ▼                 ▼
//!      free drive       active guidance      host UI / CLI
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use crate::backend::{BillingBackend, HttpBillingBackend};
use crate::config::{BillingConfig, ConfigError};
use crate::event_bus::BillingEventBus;
use crate::heartbeat::UsageHeartbeat;
use crate::session::BillingSessionCoordinator;

#[derive(Default)]
pub struct BillingContextBuilder {
    config: Option<BillingConfig>,
    backend: Option<Arc<dyn BillingBackend>>,
    event_bus: Option<Arc<BillingEventBus>>,
}

impl BillingContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: BillingConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a specific backend instead of the HTTP one built from the config.
    pub fn backend(mut self, backend: Arc<dyn BillingBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use an existing event bus (for sharing with other host components).
    pub fn event_bus(mut self, bus: Arc<BillingEventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Validate the config and wire everything together. Starts the usage
    /// heartbeat if the config sets an interval.
    pub fn build(self) -> Result<BillingContext, ConfigError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(HttpBillingBackend::new(&config)));
        let event_bus = self.event_bus.unwrap_or_default();
        let coordinator = Arc::new(BillingSessionCoordinator::with_event_bus(
            Arc::clone(&backend),
            Arc::clone(&event_bus),
        ));
        let heartbeat = config
            .heartbeat_interval()
            .map(|interval| UsageHeartbeat::start(&coordinator, interval));

        Ok(BillingContext {
            config,
            backend,
            event_bus,
            coordinator,
            heartbeat: Mutex::new(heartbeat),
        })
    }
}

/// Process-wide billing state.
pub struct BillingContext {
    config: BillingConfig,
    backend: Arc<dyn BillingBackend>,
    event_bus: Arc<BillingEventBus>,
    coordinator: Arc<BillingSessionCoordinator>,
    heartbeat: Mutex<Option<UsageHeartbeat>>,
}

impl BillingContext {
    pub fn builder() -> BillingContextBuilder {
        BillingContextBuilder::new()
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<BillingSessionCoordinator> {
        &self.coordinator
    }

    pub fn backend(&self) -> &Arc<dyn BillingBackend> {
        &self.backend
    }

    pub fn event_bus(&self) -> &Arc<BillingEventBus> {
        &self.event_bus
    }

    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(UsageHeartbeat::is_running)
    }

    /// Stop background work. The coordinator stays usable.
    pub fn shutdown(&self) {
        let heartbeat = self
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut heartbeat) = heartbeat {
            heartbeat.stop();
            log::info!("Billing heartbeat stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendRequest, RecordingBackend};
    use crate::session::{SessionState, SessionType};

    fn recording_context(config: BillingConfig) -> (Arc<RecordingBackend>, BillingContext) {
        let backend = Arc::new(RecordingBackend::auto_succeed());
        let context = BillingContext::builder()
            .config(config)
            .backend(backend.clone())
            .build()
            .unwrap();
        (backend, context)
    }

    #[test]
    fn build_uses_injected_backend() {
        let (backend, context) = recording_context(BillingConfig::default());

        context.coordinator().begin_session(SessionType::ActiveGuidance);

        assert_eq!(context.coordinator().state(), SessionState::Running);
        assert_eq!(
            backend.open_requests(),
            vec![SessionType::ActiveGuidance]
        );
        assert!(context.coordinator().session_token().is_some());
    }

    #[test]
    fn build_rejects_invalid_config() {
        let config = BillingConfig {
            base_url: String::new(),
            ..BillingConfig::default()
        };
        let result = BillingContext::builder().config(config).build();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn default_build_uses_http_backend() {
        let context = BillingContext::builder().build().unwrap();
        assert!(context.backend().current_token().is_none());
        assert_eq!(context.config(), &BillingConfig::default());
    }

    #[test]
    fn shared_event_bus_reaches_subscribers() {
        let bus = Arc::new(BillingEventBus::new());
        let mut rx = bus.subscribe();
        let context = BillingContext::builder()
            .backend(Arc::new(RecordingBackend::manual()))
            .event_bus(Arc::clone(&bus))
            .build()
            .unwrap();

        context.coordinator().pause_session();

        assert!(rx.try_recv().is_ok());
        assert!(Arc::ptr_eq(context.event_bus(), &bus));
    }

    #[test]
    fn heartbeat_follows_config() {
        let (_, without) = recording_context(BillingConfig::default());
        assert!(!without.heartbeat_running());

        let config = BillingConfig {
            heartbeat_interval_secs: Some(3600),
            ..BillingConfig::default()
        };
        let (backend, with) = recording_context(config);
        assert!(with.heartbeat_running());

        with.shutdown();
        assert!(!with.heartbeat_running());

        // Coordinator keeps working after shutdown.
        with.coordinator().begin_session(SessionType::FreeDrive);
        with.coordinator().stop_session();
        assert_eq!(backend.count(BackendRequest::Close), 1);
    }
}
