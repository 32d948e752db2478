//! In-process backend that records requests.
//!
//! Used by tests and by offline runs of the CLI. In manual mode every
//! completion is parked until the caller resolves it, which makes it possible
//! to deliver success or failure at an arbitrary later point and from any
//! thread.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use super::{BillingBackend, BillingError, BillingResult, Completion};
use crate::session::SessionType;

/// A request received by the [`RecordingBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendRequest {
    Open(SessionType),
    Pause,
    Resume,
    Close,
    UsageEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    AutoSucceed,
    Manual,
}

#[derive(Default)]
struct RecordingState {
    requests: Vec<BackendRequest>,
    token: Option<String>,
    pending_opens: VecDeque<Completion>,
    pending_resumes: VecDeque<Completion>,
    pending_usage_events: VecDeque<Completion>,
}

pub struct RecordingBackend {
    mode: Mode,
    state: Mutex<RecordingState>,
}

impl RecordingBackend {
    /// Every completion resolves with `Ok` before the request returns.
    pub fn auto_succeed() -> Self {
        Self::with_mode(Mode::AutoSucceed)
    }

    /// Completions are queued until resolved with `succeed_next_*` or
    /// `fail_next_*`.
    pub fn manual() -> Self {
        Self::with_mode(Mode::Manual)
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            state: Mutex::new(RecordingState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<BackendRequest> {
        self.lock().requests.clone()
    }

    /// Session types of every open request received so far.
    pub fn open_requests(&self) -> Vec<SessionType> {
        self.lock()
            .requests
            .iter()
            .filter_map(|request| match request {
                BackendRequest::Open(session_type) => Some(*session_type),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, request: BackendRequest) -> usize {
        self.lock().requests.iter().filter(|r| **r == request).count()
    }

    pub fn set_token(&self, token: Option<String>) {
        self.lock().token = token;
    }

    pub fn pending_opens(&self) -> usize {
        self.lock().pending_opens.len()
    }

    pub fn pending_resumes(&self) -> usize {
        self.lock().pending_resumes.len()
    }

    pub fn pending_usage_events(&self) -> usize {
        self.lock().pending_usage_events.len()
    }

    /// Resolve the oldest pending open with success. Returns false if none.
    pub fn succeed_next_open(&self) -> bool {
        let completion = self.lock().pending_opens.pop_front();
        match completion {
            Some(completion) => {
                self.issue_token();
                completion(Ok(()));
                true
            }
            None => false,
        }
    }

    pub fn fail_next_open(&self, error: BillingError) -> bool {
        let completion = self.lock().pending_opens.pop_front();
        resolve(completion, Err(error))
    }

    pub fn succeed_next_resume(&self) -> bool {
        let completion = self.lock().pending_resumes.pop_front();
        resolve(completion, Ok(()))
    }

    pub fn fail_next_resume(&self, error: BillingError) -> bool {
        let completion = self.lock().pending_resumes.pop_front();
        resolve(completion, Err(error))
    }

    pub fn succeed_next_usage_event(&self) -> bool {
        let completion = self.lock().pending_usage_events.pop_front();
        resolve(completion, Ok(()))
    }

    pub fn fail_next_usage_event(&self, error: BillingError) -> bool {
        let completion = self.lock().pending_usage_events.pop_front();
        resolve(completion, Err(error))
    }

    fn issue_token(&self) {
        let mut state = self.lock();
        if state.token.is_none() {
            state.token = Some(format!("offline-{}", Uuid::new_v4()));
        }
    }

    /// Records the request and either resolves the completion right away or
    /// parks it in the queue picked by `queue`.
    fn submit(
        &self,
        request: BackendRequest,
        completion: Completion,
        queue: fn(&mut RecordingState) -> &mut VecDeque<Completion>,
    ) {
        {
            let mut state = self.lock();
            state.requests.push(request);
            if self.mode == Mode::Manual {
                queue(&mut *state).push_back(completion);
                return;
            }
        }
        // Resolved outside the lock: completions may call straight back in.
        if let BackendRequest::Open(_) = request {
            self.issue_token();
        }
        completion(Ok(()));
    }
}

fn resolve(completion: Option<Completion>, result: BillingResult) -> bool {
    match completion {
        Some(completion) => {
            completion(result);
            true
        }
        None => false,
    }
}

impl BillingBackend for RecordingBackend {
    fn current_token(&self) -> Option<String> {
        self.lock().token.clone()
    }

    fn open_session(&self, session_type: SessionType, completion: Completion) {
        self.submit(BackendRequest::Open(session_type), completion, |s| {
            &mut s.pending_opens
        });
    }

    fn pause_session(&self) {
        self.lock().requests.push(BackendRequest::Pause);
    }

    fn resume_session(&self, completion: Completion) {
        self.submit(BackendRequest::Resume, completion, |s| {
            &mut s.pending_resumes
        });
    }

    fn close_session(&self) {
        let mut state = self.lock();
        state.requests.push(BackendRequest::Close);
        state.token = None;
    }

    fn report_usage_event(&self, completion: Completion) {
        self.submit(BackendRequest::UsageEvent, completion, |s| {
            &mut s.pending_usage_events
        });
    }
}
