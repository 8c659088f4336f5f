/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Keeps the backend's record of this device in step with the platform
//! subscription.
//!
//! A failure here never undoes the local subscription: pushes are delivered
//! by the push service whether or not our backend knows about the device, it
//! just can't target a device it has no record of. Failures are therefore
//! handed back as a [`SyncStatus`] for the caller to surface as "notifications
//! may be delayed".

use crate::error::{debug, warn, Result};
use crate::internal::communications::{Connection, SubscriptionRecord};
use crate::{PushSubscription, SyncStatus};

pub struct ServerSync<Co> {
    connection: Co,
    user_agent: String,
}

impl<Co: Connection> ServerSync<Co> {
    pub fn new(connection: Co, user_agent: &str) -> Self {
        Self {
            connection,
            user_agent: user_agent.to_owned(),
        }
    }

    pub fn connection(&self) -> &Co {
        &self.connection
    }

    /// Send the subscription to the backend, propagating any failure.
    pub async fn try_push(&self, subscription: &PushSubscription) -> Result<()> {
        let record = SubscriptionRecord::for_subscribe(subscription, &self.user_agent);
        self.connection.subscribe(&record).await?;
        debug!("server now knows endpoint '{}'", subscription.endpoint);
        Ok(())
    }

    /// Ask the backend to forget the subscription, propagating any failure.
    pub async fn try_remove(&self, subscription: &PushSubscription) -> Result<()> {
        let record = SubscriptionRecord::for_unsubscribe(subscription);
        self.connection.unsubscribe(&record).await?;
        debug!("server forgot endpoint '{}'", subscription.endpoint);
        Ok(())
    }

    pub async fn push(&self, subscription: &PushSubscription) -> SyncStatus {
        match self.try_push(subscription).await {
            Ok(()) => SyncStatus::Synced,
            Err(e) => {
                warn!("failed to register subscription with the server: {}", e);
                SyncStatus::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub async fn remove(&self, subscription: &PushSubscription) -> SyncStatus {
        match self.try_remove(subscription).await {
            Ok(()) => SyncStatus::Synced,
            Err(e) => {
                warn!("failed to remove subscription from the server: {}", e);
                SyncStatus::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
