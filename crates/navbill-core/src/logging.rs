//! Append-only log of billing backend requests.
//!
//! One timestamped line per request start and outcome, correlated by a
//! request id. Disabled when no log directory is configured.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{SecondsFormat, Utc};
use uuid::Uuid;

use crate::backend::BackendOperation;

const LOG_FILE_NAME: &str = "billing-requests.log";

/// Thread-safe handle to the request log. Cheap to clone.
#[derive(Clone, Default)]
pub struct RequestLog {
    file: Arc<Mutex<Option<File>>>,
}

impl RequestLog {
    /// Open (or create) `{log_dir}/billing-requests.log`.
    ///
    /// Falls back to a disabled log if the directory or file cannot be
    /// created; billing must never fail because of logging.
    pub fn open(log_dir: Option<&Path>) -> Self {
        let file = log_dir.and_then(|dir| {
            if let Err(err) = std::fs::create_dir_all(dir) {
                log::warn!("Cannot create billing log dir {}: {}", dir.display(), err);
                return None;
            }
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(LOG_FILE_NAME))
                .map_err(|err| log::warn!("Cannot open billing request log: {}", err))
                .ok()
        });
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Write `[timestamp] request_id operation: detail`.
    pub fn record(&self, request_id: Uuid, operation: BackendOperation, detail: &str) {
        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ref mut file) = *guard {
            let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
            let _ = writeln!(file, "[{}] {} {}: {}", ts, request_id, operation, detail);
            let _ = file.flush();
        }
    }
}
