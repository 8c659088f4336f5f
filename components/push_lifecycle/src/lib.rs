/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

#![allow(unknown_lints)]
#![warn(rust_2018_idioms)]
//! # Push Lifecycle Component
//!
//! This component manages the lifecycle of a single
//! [WebPush](https://developer.mozilla.org/en-US/docs/Web/API/Push_API) subscription
//! for an application: it negotiates notification permission, registers the
//! background worker that receives pushes, creates (or reuses) the subscription
//! against the application server key and keeps the backend's record of the
//! device in step.
//!
//! ## Background Concepts
//!
//! ### Subscriptions
//!
//! A *subscription* is a platform-issued credential made of an HTTP endpoint and
//! a pair of encryption keys. The platform owns it; we only ever read it, hand
//! it to the backend, or ask the platform to cancel it. There is at most one
//! subscription per worker registration, and we always ask the platform for the
//! current one before creating another.
//!
//! ### The application server key
//!
//! Subscriptions are locked to the backend's VAPID public key. It is fetched
//! once per process and then served from a cache.
//!
//! ### The "push activated" flag
//!
//! A boolean persisted on the device that the UI uses to avoid re-prompting.
//! It is a hint and nothing more: [`PushManager::is_subscribed`] asks the
//! platform, and [`PushManager::reconcile`] brings the flag back in line.
//!
//! ### Server sync
//!
//! Pushes are delivered by the platform's push service whether or not the
//! backend knows about this device, so a failure to sync with the backend never
//! undoes a local subscription. It is reported as [`SyncStatus::Failed`] so the
//! caller can show "notifications may be delayed".
//!
//! ## API
//!
//! ```ignore
//! let config = PushConfiguration::new("api.example.com", "/path/to/push.db");
//! let manager = PushManager::new(config, platform)?;
//!
//! // On application start.
//! manager.reconcile(false).await?;
//!
//! // When the user asks for notifications.
//! match manager.subscribe().await {
//!     Ok(response) if response.sync.is_degraded() => show_delayed_warning(),
//!     Ok(_) => (),
//!     Err(PushApiError::PermissionDenied { .. }) => show_settings_help(),
//!     Err(e) => show_error(e),
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod error;
mod internal;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{ApiResult, PushApiError};
use error::convert_log_report_error;

pub use internal::codec;
pub use internal::communications::{
    Connection, NotificationPreference, PreferencesResponse, SubscriptionRecord,
};
#[cfg(not(target_arch = "wasm32"))]
pub use internal::communications::ConnectHttp;
pub use internal::config::{PushConfiguration, Protocol};
pub use internal::platform::{Platform, WorkerRegistration};
pub use internal::storage::Storage;
#[cfg(not(target_arch = "wasm32"))]
pub use internal::storage::Store;
pub use internal::vapid::{KeyCache, VapidKey, VapidKeyCache};
#[cfg(all(target_arch = "wasm32", feature = "web"))]
pub use internal::web::{WebPlatform, WebStorage};
pub use internal::{ManagerState, SubscriptionManager};

/// The notification permission, owned by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    /// The user has not decided yet; asking shows a prompt.
    Default,
    Granted,
    Denied,
}

impl PermissionState {
    /// `Granted` and `Denied` are final as far as we're concerned: asking
    /// again never shows a prompt.
    pub fn is_settled(self) -> bool {
        !matches!(self, PermissionState::Default)
    }
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PermissionState::Default => "default",
            PermissionState::Granted => "granted",
            PermissionState::Denied => "denied",
        })
    }
}

/// Key Information that can be used to encrypt payloads. These are encoded as base64
/// so will need to be decoded before they can actually be used as keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub auth: String,
    pub p256dh: String,
}

/// A subscription as handed out by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: KeyInfo,
}

/// How the backend side of an operation went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Synced,
    /// There was nothing to tell the backend, or it was told recently.
    NotAttempted,
    /// The local state is fine but the backend doesn't know about it.
    Failed { reason: String },
}

impl SyncStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, SyncStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionResponse {
    pub subscription: PushSubscription,
    /// True when the platform already had a subscription and no new one was
    /// created.
    pub reused: bool,
    pub sync: SyncStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeResponse {
    /// False when there was no subscription to remove.
    pub removed: bool,
    pub sync: SyncStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// What the platform says.
    pub subscribed: bool,
    /// What the local flag said before reconciling.
    pub flag_was: bool,
    pub sync: SyncStatus,
}

/// Object representing the PushManager.
///
/// All operations are asynchronous and must be awaited on a single thread.
/// Errors are returned as [`PushApiError`].
pub struct PushManager<P, Co, S, K> {
    internal: SubscriptionManager<P, Co, S, K>,
}

/// A [`PushManager`] talking to the backend over HTTP and keeping its flag in
/// SQLite.
#[cfg(not(target_arch = "wasm32"))]
pub type NativePushManager<P> = PushManager<P, ConnectHttp, Store, VapidKeyCache>;

#[cfg(not(target_arch = "wasm32"))]
impl<P: Platform> PushManager<P, ConnectHttp, Store, VapidKeyCache> {
    /// Creates a new [`PushManager`] object, opening (and if needed creating)
    /// the database at `config.database_path`.
    ///
    /// The application server key cache is shared with every other manager in
    /// the process.
    pub fn new(config: PushConfiguration, platform: P) -> ApiResult<Self> {
        let store = Store::open(&config.database_path).map_err(convert_log_report_error)?;
        let connection = ConnectHttp::connect(&config).map_err(convert_log_report_error)?;
        Ok(Self::from_parts(
            platform,
            connection,
            store,
            VapidKeyCache::shared(),
            &config,
        ))
    }
}

impl<P, Co, S, K> PushManager<P, Co, S, K>
where
    P: Platform,
    Co: Connection,
    S: Storage,
    K: KeyCache,
{
    /// Build a manager from explicit collaborators.
    pub fn from_parts(
        platform: P,
        connection: Co,
        store: S,
        key_cache: K,
        config: &PushConfiguration,
    ) -> Self {
        Self {
            internal: SubscriptionManager::new(platform, connection, store, key_cache, config),
        }
    }

    /// Whether the platform can do push at all. Everything else assumes it can.
    pub fn is_supported(&self) -> bool {
        self.internal.is_supported()
    }

    /// The current notification permission. Never prompts.
    pub fn permission_state(&self) -> PermissionState {
        self.internal.permission_state()
    }

    pub fn state(&self) -> ManagerState {
        self.internal.state()
    }

    /// Subscribes to push, prompting for permission if the user hasn't
    /// decided yet.
    ///
    /// An existing subscription is reused, never duplicated. A backend
    /// failure does not fail the call; check the returned `sync`.
    ///
    /// # Errors
    /// - [`PushApiError::Unsupported`] when the platform can't do push.
    /// - [`PushApiError::PermissionDenied`] when permission is not granted.
    ///   Don't prompt again in this session.
    /// - [`PushApiError::WorkerRegistrationFailed`],
    ///   [`PushApiError::KeyFetchFailed`] and
    ///   [`PushApiError::SubscriptionCreationFailed`], all retryable by
    ///   calling again.
    pub async fn subscribe(&self) -> ApiResult<SubscriptionResponse> {
        self.internal
            .subscribe()
            .await
            .map_err(convert_log_report_error)
    }

    /// Removes the subscription from the backend (best effort) and the
    /// platform, and clears the local flag. Succeeds without doing anything
    /// when there is no subscription.
    pub async fn unsubscribe(&self) -> ApiResult<UnsubscribeResponse> {
        self.internal
            .unsubscribe()
            .await
            .map_err(convert_log_report_error)
    }

    /// Asks the platform whether there is a live subscription.
    pub async fn is_subscribed(&self) -> ApiResult<bool> {
        self.internal
            .is_subscribed()
            .await
            .map_err(convert_log_report_error)
    }

    pub async fn get_subscription(&self) -> ApiResult<Option<PushSubscription>> {
        self.internal
            .get_subscription()
            .await
            .map_err(convert_log_report_error)
    }

    /// Reads the local "push activated" hint.
    pub fn is_activated(&self) -> ApiResult<bool> {
        self.internal
            .is_activated()
            .map_err(convert_log_report_error)
    }

    /// Brings the local flag in line with the platform and refreshes the
    /// backend record at most once a day (always, if `force`). Call it when
    /// the application starts.
    pub async fn reconcile(&self, force: bool) -> ApiResult<ReconcileReport> {
        self.internal
            .reconcile(force)
            .await
            .map_err(convert_log_report_error)
    }

    /// Re-sends the current subscription to the backend.
    ///
    /// Returns false when there is no subscription. Unlike
    /// [`Self::subscribe`], a backend failure is an error here
    /// ([`PushApiError::ServerSyncFailed`]).
    pub async fn sync_now(&self) -> ApiResult<bool> {
        self.internal
            .sync_now()
            .await
            .map_err(convert_log_report_error)
    }

    pub async fn get_preferences(&self) -> ApiResult<PreferencesResponse> {
        self.internal
            .get_preferences()
            .await
            .map_err(convert_log_report_error)
    }

    pub async fn set_preferences(&self, preferences: &BTreeMap<String, bool>) -> ApiResult<()> {
        self.internal
            .set_preferences(preferences)
            .await
            .map_err(convert_log_report_error)
    }

    /// Asks the backend to push a test message to this user. Returns false
    /// when too many were sent recently.
    pub async fn send_test_notification(&self) -> ApiResult<bool> {
        self.internal
            .send_test_notification()
            .await
            .map_err(convert_log_report_error)
    }
}
