/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The capability set the host runtime exposes to us.
//!
//! Browsers surface these as loosely typed objects hanging off `window` and
//! `navigator`. Here they are a single trait, so the lifecycle code never
//! checks for features itself: the web adapter does that once, and tests
//! substitute a fake.

use async_trait::async_trait;

use crate::error::Result;
use crate::{PermissionState, PushSubscription};

/// A ready background worker registration.
///
/// Adapters may keep richer platform handles internally; this is the part the
/// lifecycle code needs to address the registration again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRegistration {
    /// The scope the worker controls.
    pub scope: String,
    /// The script the worker was registered from.
    pub script_url: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait(?Send)]
pub trait Platform {
    /// True only when worker registration, push management and notification
    /// permission are all available. Must be synchronous and side-effect free.
    fn is_supported(&self) -> bool;

    /// The current notification permission. Never prompts.
    fn permission_state(&self) -> PermissionState;

    /// Show the permission prompt and wait for the user's decision. A prompt
    /// that gets dismissed resolves to [`PermissionState::Default`].
    async fn request_permission(&self) -> PermissionState;

    /// Register the worker script at `script_path` for `scope` and wait until
    /// the registration reports ready.
    async fn register_worker(&self, script_path: &str, scope: &str)
        -> Result<WorkerRegistration>;

    /// The live subscription for this registration, if there is one.
    async fn get_subscription(
        &self,
        registration: &WorkerRegistration,
    ) -> Result<Option<PushSubscription>>;

    /// Ask the push service for a subscription locked to
    /// `application_server_key` (raw, decoded bytes).
    async fn subscribe(
        &self,
        registration: &WorkerRegistration,
        application_server_key: &[u8],
    ) -> Result<PushSubscription>;

    /// Cancel the registration's subscription. Returns false when the platform
    /// reports it did not unsubscribe.
    async fn unsubscribe(&self, registration: &WorkerRegistration) -> Result<bool>;
}
