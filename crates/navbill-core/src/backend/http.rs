//! REST billing backend.
//!
//! Every request runs on its own thread so callers never block on network
//! I/O. Completions are invoked from that thread.
//!
//! | Operation            | Request                              |
//! |----------------------|--------------------------------------|
//! | `open_session`       | `POST {base}/sessions`               |
//! | `pause_session`      | `POST {base}/sessions/{token}/pause` |
//! | `resume_session`     | `POST {base}/sessions/{token}/resume`|
//! | `close_session`      | `DELETE {base}/sessions/{token}`     |
//! | `report_usage_event` | `POST {base}/events`                 |

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::{BackendOperation, BillingBackend, BillingError, BillingResult, Completion};
use crate::config::BillingConfig;
use crate::logging::RequestLog;
use crate::session::SessionType;

#[derive(Debug, Serialize)]
struct OpenSessionRequest {
    session_type: SessionType,
    max_session_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
struct OpenSessionResponse {
    token: String,
}

#[derive(Debug, Serialize)]
struct UsageEventRequest<'a> {
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
}

/// Token handed out by the service for an open session.
#[derive(Debug, Clone)]
struct IssuedToken {
    value: String,
    session_type: SessionType,
    issued_at: Instant,
}

impl IssuedToken {
    fn is_valid_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.issued_at) < self.session_type.max_session_interval()
    }
}

#[derive(Debug, Default)]
struct TokenState {
    issued: Option<IssuedToken>,
    /// Bumped by every close. An open sent under an older generation was
    /// overtaken by a close and must not keep its token.
    close_generation: u64,
}

struct HttpInner {
    base_url: String,
    access_token: String,
    agent: ureq::Agent,
    token: Mutex<TokenState>,
    request_log: RequestLog,
}

impl HttpInner {
    fn lock_token(&self) -> MutexGuard<'_, TokenState> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `{base}/{segments...}` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, BillingError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            BillingError::RequestFailed(format!("invalid base url {}: {}", self.base_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                BillingError::RequestFailed(format!(
                    "base url {} cannot take a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: &str, segments: &[&str]) -> Result<ureq::Request, BillingError> {
        let url = self.endpoint(segments)?;
        Ok(self
            .agent
            .request_url(method, &url)
            .query("access_token", &self.access_token))
    }

    fn valid_token(&self) -> Option<String> {
        let guard = self.lock_token();
        guard
            .issued
            .as_ref()
            .filter(|token| token.is_valid_at(Instant::now()))
            .map(|token| token.value.clone())
    }

    fn open(&self, session_type: SessionType, generation: u64) -> BillingResult {
        let body = OpenSessionRequest {
            session_type,
            max_session_interval_secs: session_type.max_session_interval().as_secs(),
        };
        let response = self
            .request("POST", &["sessions"])?
            .send_json(&body)
            .map_err(map_ureq_error)?;
        let parsed: OpenSessionResponse = response
            .into_json()
            .map_err(|e| BillingError::InvalidResponse(e.to_string()))?;
        if parsed.token.is_empty() {
            return Err(BillingError::InvalidResponse(
                "empty session token".to_string(),
            ));
        }

        {
            let mut state = self.lock_token();
            if state.close_generation == generation {
                state.issued = Some(IssuedToken {
                    value: parsed.token,
                    session_type,
                    issued_at: Instant::now(),
                });
                return Ok(());
            }
        }

        log::info!("Billing session closed while opening; closing {}", parsed.token);
        let request_id = Uuid::new_v4();
        self.request_log
            .record(request_id, BackendOperation::CloseSession, "sent");
        match self.close(&parsed.token) {
            Ok(()) => self
                .request_log
                .record(request_id, BackendOperation::CloseSession, "ok"),
            Err(err) => {
                log::warn!("Billing close of overtaken session failed: {}", err);
                self.request_log.record(
                    request_id,
                    BackendOperation::CloseSession,
                    &format!("failed: {}", err),
                );
            }
        }
        Ok(())
    }

    fn session_action(&self, action: &str) -> BillingResult {
        let token = self.valid_token().ok_or(BillingError::NoSession)?;
        self.request("POST", &["sessions", token.as_str(), action])?
            .call()
            .map_err(map_ureq_error)?;
        Ok(())
    }

    fn close(&self, token: &str) -> BillingResult {
        self.request("DELETE", &["sessions", token])?
            .call()
            .map_err(map_ureq_error)?;
        Ok(())
    }

    fn usage_event(&self) -> BillingResult {
        let token = self.valid_token();
        let body = UsageEventRequest {
            kind: "usage",
            token: token.as_deref(),
        };
        self.request("POST", &["events"])?
            .send_json(&body)
            .map_err(map_ureq_error)?;
        Ok(())
    }
}

fn map_ureq_error(err: ureq::Error) -> BillingError {
    match err {
        ureq::Error::Status(status, response) => BillingError::Http {
            status,
            body: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => BillingError::Transport(transport.to_string()),
    }
}

/// Production backend talking to the billing REST service.
pub struct HttpBillingBackend {
    inner: Arc<HttpInner>,
}

impl HttpBillingBackend {
    pub fn new(config: &BillingConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.request_timeout())
            .build();
        Self {
            inner: Arc::new(HttpInner {
                base_url: config.base_url.clone(),
                access_token: config.access_token.clone(),
                agent,
                token: Mutex::new(TokenState::default()),
                request_log: RequestLog::open(config.log_dir.as_deref()),
            }),
        }
    }

    /// Run `request` on a background thread, log its outcome, then hand it
    /// to `completion` if there is one.
    fn dispatch<F>(&self, operation: BackendOperation, request: F, completion: Option<Completion>)
    where
        F: FnOnce(&HttpInner) -> BillingResult + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let request_id = Uuid::new_v4();
        inner.request_log.record(request_id, operation, "sent");

        std::thread::spawn(move || {
            let result = request(&inner);
            match &result {
                Ok(()) => {
                    log::debug!("Billing {} succeeded ({})", operation, request_id);
                    inner.request_log.record(request_id, operation, "ok");
                }
                Err(err) => {
                    log::warn!("Billing {} failed ({}): {}", operation, request_id, err);
                    inner
                        .request_log
                        .record(request_id, operation, &format!("failed: {}", err));
                }
            }
            if let Some(completion) = completion {
                completion(result);
            }
        });
    }
}

impl BillingBackend for HttpBillingBackend {
    fn current_token(&self) -> Option<String> {
        self.inner.valid_token()
    }

    fn open_session(&self, session_type: SessionType, completion: Completion) {
        let generation = self.inner.lock_token().close_generation;
        self.dispatch(
            BackendOperation::OpenSession,
            move |inner| inner.open(session_type, generation),
            Some(completion),
        );
    }

    fn pause_session(&self) {
        self.dispatch(
            BackendOperation::PauseSession,
            |inner| inner.session_action("pause"),
            None,
        );
    }

    fn resume_session(&self, completion: Completion) {
        self.dispatch(
            BackendOperation::ResumeSession,
            |inner| inner.session_action("resume"),
            Some(completion),
        );
    }

    fn close_session(&self) {
        // Forget the token right away so it is not handed out while the
        // DELETE is in flight. Opens still in flight see the new generation
        // and close their own session when they land.
        let token = {
            let mut state = self.inner.lock_token();
            state.close_generation = state.close_generation.wrapping_add(1);
            state.issued.take()
        };
        let Some(token) = token else {
            log::debug!("close_session with no billing token yet");
            return;
        };
        self.dispatch(
            BackendOperation::CloseSession,
            move |inner| inner.close(&token.value),
            None,
        );
    }

    fn report_usage_event(&self, completion: Completion) {
        self.dispatch(
            BackendOperation::UsageEvent,
            |inner| inner.usage_event(),
            Some(completion),
        );
    }
}
