/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use crate::error::{debug, info};
use crate::internal::platform::Platform;
use crate::PermissionState;

/// Reads and requests notification permission.
///
/// Once the platform has settled on `Granted` or `Denied` the prompt is never
/// shown again; only `Default` leads to a prompt.
pub struct PermissionGate<'a, P: ?Sized> {
    platform: &'a P,
}

impl<'a, P: Platform + ?Sized> PermissionGate<'a, P> {
    pub fn new(platform: &'a P) -> Self {
        Self { platform }
    }

    pub fn current_state(&self) -> PermissionState {
        self.platform.permission_state()
    }

    pub async fn request_permission(&self) -> PermissionState {
        let current = self.current_state();
        if current.is_settled() {
            debug!("permission already '{}', not prompting", current);
            return current;
        }
        debug!("prompting for notification permission");
        let state = self.platform.request_permission().await;
        info!("permission prompt resolved to '{}'", state);
        state
    }
}
