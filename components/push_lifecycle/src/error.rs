/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

pub use log::{debug, error, info, trace, warn};

use crate::PermissionState;

pub type Result<T, E = Error> = std::result::Result<T, E>;
pub type ApiResult<T, E = PushApiError> = std::result::Result<T, E>;

/// The errors consumers of the push lifecycle see.
///
/// Every failure of an asynchronous operation ends up as one of these, so a
/// caller can decide between retrying, showing remediation instructions or
/// quietly degrading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushApiError {
    /// The runtime lacks a worker container, a push manager or notifications.
    /// Terminal, there is nothing to retry.
    #[error("Push notifications are not supported: {reason}")]
    Unsupported { reason: String },

    /// The user declined, or platform policy denies, notifications. Callers
    /// must not re-prompt automatically within the same session.
    #[error("Notification permission not granted (state: {state})")]
    PermissionDenied { state: PermissionState },

    /// The worker script could not be fetched or its registration was rejected.
    #[error("Worker registration failed: {reason}")]
    WorkerRegistrationFailed { reason: String },

    /// The server key could not be fetched or decoded. Nothing is cached, so
    /// the next call fetches again.
    #[error("Could not fetch the application server key: {reason}")]
    KeyFetchFailed { reason: String },

    /// The push service refused to create a subscription.
    #[error("Subscription creation failed: {reason}")]
    SubscriptionCreationFailed { reason: String },

    /// The backend could not be reached or rejected the request. When this is
    /// about a subscription record, the local subscription stays valid.
    #[error("Server sync failed: {reason}")]
    ServerSyncFailed { reason: String },

    /// The platform refused to cancel the subscription.
    #[error("Unsubscribe failed: {reason}")]
    UnsubscribeFailed { reason: String },

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unsupported platform: {0}")]
    Unsupported(String),

    #[error("Permission not granted: {0}")]
    PermissionDenied(PermissionState),

    #[error("Worker registration error: {0}")]
    WorkerRegistration(String),

    #[error("Key fetch error: {0}")]
    KeyFetch(String),

    #[error("Invalid base64url key: {0}")]
    Codec(#[from] base64::DecodeError),

    #[error("Subscription creation error: {0}")]
    SubscriptionCreation(String),

    #[error("Unsubscribe error: {0}")]
    Unsubscribe(String),

    /// A failure reported by a [`Platform`](crate::Platform) adapter.
    #[error("Platform error: {0}")]
    Platform(String),

    /// A client error (4xx) from the backend.
    #[error("Communication Error: {0:?}")]
    Communication(String),

    /// A server error (5xx) from the backend.
    #[error("Communication Server Error: {0:?}")]
    CommunicationServer(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("HTTP transport error: {0}")]
    Transport(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0:?}")]
    UrlParse(#[from] url::ParseError),

    #[error("Storage Error: {0:?}")]
    Storage(String),

    #[cfg(not(target_arch = "wasm32"))]
    #[error("Error executing SQL: {0}")]
    StorageSql(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Describes how an internal error is turned into a [`PushApiError`], and
/// at which level (if any) it gets logged on the way out.
pub struct ErrorHandling<E> {
    pub err: E,
    pub log_level: Option<log::Level>,
}

impl<E> ErrorHandling<E> {
    /// Convert without logging.
    pub fn passthrough(err: E) -> Self {
        Self {
            err,
            log_level: None,
        }
    }

    /// Convert and log at `level`.
    pub fn log(err: E, level: log::Level) -> Self {
        Self {
            err,
            log_level: Some(level),
        }
    }
}

pub trait GetErrorHandling {
    type ExternalError;

    fn get_error_handling(&self) -> ErrorHandling<Self::ExternalError>;
}

impl GetErrorHandling for Error {
    type ExternalError = PushApiError;

    fn get_error_handling(&self) -> ErrorHandling<Self::ExternalError> {
        let reason = self.to_string();
        match self {
            Error::Unsupported(_) => {
                ErrorHandling::log(PushApiError::Unsupported { reason }, log::Level::Info)
            }
            Error::PermissionDenied(state) => {
                ErrorHandling::passthrough(PushApiError::PermissionDenied { state: *state })
            }
            Error::WorkerRegistration(_) => ErrorHandling::log(
                PushApiError::WorkerRegistrationFailed { reason },
                log::Level::Warn,
            ),
            Error::KeyFetch(_) | Error::Codec(_) => {
                ErrorHandling::log(PushApiError::KeyFetchFailed { reason }, log::Level::Warn)
            }
            Error::SubscriptionCreation(_) => ErrorHandling::log(
                PushApiError::SubscriptionCreationFailed { reason },
                log::Level::Warn,
            ),
            Error::Unsubscribe(_) => {
                ErrorHandling::log(PushApiError::UnsubscribeFailed { reason }, log::Level::Warn)
            }
            Error::Communication(_)
            | Error::CommunicationServer(_)
            | Error::Unauthorized(_)
            | Error::Transport(_)
            | Error::Json(_) => {
                ErrorHandling::log(PushApiError::ServerSyncFailed { reason }, log::Level::Warn)
            }
            _ => ErrorHandling::log(PushApiError::Internal { reason }, log::Level::Error),
        }
    }
}

/// Take the logging action requested by the error's handling and return the
/// public error. All public entry points funnel their errors through here.
pub fn convert_log_report_error<IE, EE>(e: IE) -> EE
where
    IE: GetErrorHandling<ExternalError = EE> + std::error::Error,
    EE: std::error::Error,
{
    let handling = e.get_error_handling();
    if let Some(level) = handling.log_level {
        log::log!(level, "{}", e);
    }
    handling.err
}

#[cfg(test)]
pub fn init_for_tests() {
    let _ = env_logger::builder().is_test(true).try_init();
}
