/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The subscription state machine.
//!
//! [`SubscriptionManager`] walks a subscribe request through the support
//! check, the permission gate, worker registration, the key cache, the
//! platform and finally the backend, strictly in that order. The platform's
//! subscription object is the only source of truth; the local flag and the
//! backend record are kept in step with it on a best effort basis.

use std::cell::Cell;
use std::collections::BTreeMap;

use crate::error::{debug, info, warn, Error, Result};
use crate::internal::communications::{Connection, PreferencesResponse};
use crate::internal::config::PushConfiguration;
use crate::internal::permission::PermissionGate;
use crate::internal::platform::{Platform, WorkerRegistration};
use crate::internal::rate_limiter::PersistedRateLimiter;
use crate::internal::storage::Storage;
use crate::internal::sync::ServerSync;
use crate::internal::vapid::{self, KeyCache};
use crate::internal::worker::WorkerRegistrar;
use crate::{
    PermissionState, PushSubscription, ReconcileReport, SubscriptionResponse, SyncStatus,
    UnsubscribeResponse,
};

const RECONCILE_SYNC_INTERVAL: u64 = 24 * 60 * 60;
const SEND_TEST_INTERVAL: u64 = 60 * 60;
const SEND_TEST_MAX_CALLS: u16 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    NoSubscription,
    Subscribing,
    Subscribed,
    Unsubscribing,
}

impl ManagerState {
    fn is_in_flight(self) -> bool {
        matches!(self, ManagerState::Subscribing | ManagerState::Unsubscribing)
    }
}

pub struct SubscriptionManager<P, Co, S, K> {
    platform: P,
    sync: ServerSync<Co>,
    store: S,
    key_cache: K,
    registrar: WorkerRegistrar,
    state: Cell<ManagerState>,
    reconcile_limiter: PersistedRateLimiter,
    send_test_limiter: PersistedRateLimiter,
}

impl<P, Co, S, K> SubscriptionManager<P, Co, S, K>
where
    P: Platform,
    Co: Connection,
    S: Storage,
    K: KeyCache,
{
    pub fn new(
        platform: P,
        connection: Co,
        store: S,
        key_cache: K,
        config: &PushConfiguration,
    ) -> Self {
        Self {
            platform,
            sync: ServerSync::new(connection, &config.user_agent),
            store,
            key_cache,
            registrar: WorkerRegistrar::new(&config.worker_script_path, &config.worker_scope),
            state: Cell::new(ManagerState::NoSubscription),
            reconcile_limiter: PersistedRateLimiter::new(
                "reconcile_sync",
                RECONCILE_SYNC_INTERVAL,
                1,
            ),
            send_test_limiter: PersistedRateLimiter::new(
                "send_test",
                SEND_TEST_INTERVAL,
                SEND_TEST_MAX_CALLS,
            ),
        }
    }

    pub fn state(&self) -> ManagerState {
        self.state.get()
    }

    pub fn is_supported(&self) -> bool {
        self.platform.is_supported()
    }

    pub fn permission_state(&self) -> PermissionState {
        PermissionGate::new(&self.platform).current_state()
    }

    fn ensure_supported(&self) -> Result<()> {
        if !self.platform.is_supported() {
            return Err(Error::Unsupported(
                "worker registration, push manager or notifications are missing".to_string(),
            ));
        }
        Ok(())
    }

    fn settle(&self, subscribed: bool) {
        if !self.state.get().is_in_flight() {
            self.state.set(if subscribed {
                ManagerState::Subscribed
            } else {
                ManagerState::NoSubscription
            });
        }
    }

    fn set_flag(&self, activated: bool) {
        if let Err(e) = self.store.set_push_activated(activated) {
            warn!("failed to persist push activated = {}: {}", activated, e);
        }
    }

    async fn current_subscription(
        &self,
    ) -> Result<(WorkerRegistration, Option<PushSubscription>)> {
        let registration = self.registrar.register_and_wait_ready(&self.platform).await?;
        let subscription = self.platform.get_subscription(&registration).await?;
        Ok((registration, subscription))
    }

    pub async fn subscribe(&self) -> Result<SubscriptionResponse> {
        self.ensure_supported()?;
        let prior = self.state.get();
        self.state.set(ManagerState::Subscribing);
        match self.do_subscribe().await {
            Ok(response) => {
                self.state.set(ManagerState::Subscribed);
                Ok(response)
            }
            Err(e) => {
                self.state.set(if prior.is_in_flight() {
                    ManagerState::NoSubscription
                } else {
                    prior
                });
                Err(e)
            }
        }
    }

    async fn do_subscribe(&self) -> Result<SubscriptionResponse> {
        let permission = PermissionGate::new(&self.platform)
            .request_permission()
            .await;
        if permission != PermissionState::Granted {
            info!("not subscribing, permission is '{}'", permission);
            return Err(Error::PermissionDenied(permission));
        }

        let registration = self.registrar.register_and_wait_ready(&self.platform).await?;

        let existing = self
            .platform
            .get_subscription(&registration)
            .await
            .map_err(|e| Error::SubscriptionCreation(e.to_string()))?;
        let (subscription, reused) = match existing {
            Some(subscription) => {
                debug!("reusing subscription for '{}'", subscription.endpoint);
                (subscription, true)
            }
            None => {
                let key = vapid::get_or_fetch(&self.key_cache, self.sync.connection()).await?;
                debug!("creating a new subscription");
                let subscription = self
                    .platform
                    .subscribe(&registration, key.as_bytes())
                    .await
                    .map_err(|e| Error::SubscriptionCreation(e.to_string()))?;
                (subscription, false)
            }
        };

        let sync = self.sync.push(&subscription).await;
        self.set_flag(true);
        Ok(SubscriptionResponse {
            subscription,
            reused,
            sync,
        })
    }

    pub async fn unsubscribe(&self) -> Result<UnsubscribeResponse> {
        self.ensure_supported()?;
        let prior = self.state.get();
        self.state.set(ManagerState::Unsubscribing);
        let result = self.do_unsubscribe().await;
        self.state.set(match &result {
            Ok(_) => ManagerState::NoSubscription,
            Err(Error::Unsubscribe(_)) => ManagerState::Subscribed,
            Err(_) if prior.is_in_flight() => ManagerState::NoSubscription,
            Err(_) => prior,
        });
        result
    }

    async fn do_unsubscribe(&self) -> Result<UnsubscribeResponse> {
        let (registration, subscription) = self.current_subscription().await?;
        let Some(subscription) = subscription else {
            debug!("no subscription to remove");
            self.set_flag(false);
            return Ok(UnsubscribeResponse {
                removed: false,
                sync: SyncStatus::NotAttempted,
            });
        };

        let sync = self.sync.remove(&subscription).await;
        let cancelled = self
            .platform
            .unsubscribe(&registration)
            .await
            .map_err(|e| Error::Unsubscribe(e.to_string()))?;
        if !cancelled {
            return Err(Error::Unsubscribe(format!(
                "platform kept the subscription for '{}'",
                subscription.endpoint
            )));
        }
        self.set_flag(false);
        Ok(UnsubscribeResponse {
            removed: true,
            sync,
        })
    }

    /// Ask the platform, never the local flag.
    pub async fn is_subscribed(&self) -> Result<bool> {
        Ok(self.get_subscription().await?.is_some())
    }

    pub async fn get_subscription(&self) -> Result<Option<PushSubscription>> {
        if !self.platform.is_supported() {
            return Ok(None);
        }
        let (_, subscription) = self.current_subscription().await?;
        self.settle(subscription.is_some());
        Ok(subscription)
    }

    /// The local hint. Use [`Self::is_subscribed`] for a definitive answer.
    pub fn is_activated(&self) -> Result<bool> {
        self.store.get_push_activated()
    }

    /// Bring the local flag (and, at most daily, the backend) in line with
    /// the platform. Meant to run on application start; never prompts.
    pub async fn reconcile(&self, force: bool) -> Result<ReconcileReport> {
        self.ensure_supported()?;
        let flag_was = self.store.get_push_activated().unwrap_or_else(|e| {
            warn!("could not read the push activated flag: {}", e);
            false
        });

        let subscription = if self.platform.permission_state() == PermissionState::Granted {
            match self.current_subscription().await {
                Ok((_, subscription)) => subscription,
                Err(e) => {
                    warn!("no ready worker registration while reconciling: {}", e);
                    self.registrar.forget();
                    None
                }
            }
        } else {
            None
        };

        let Some(subscription) = subscription else {
            if flag_was {
                info!("push was marked active but there is no subscription, resetting");
            }
            self.set_flag(false);
            self.settle(false);
            return Ok(ReconcileReport {
                subscribed: false,
                flag_was,
                sync: SyncStatus::NotAttempted,
            });
        };

        self.set_flag(true);
        self.settle(true);
        let sync = if force || self.reconcile_limiter.check(&self.store) {
            self.sync.push(&subscription).await
        } else {
            debug!("server record refreshed recently, skipping");
            SyncStatus::NotAttempted
        };
        Ok(ReconcileReport {
            subscribed: true,
            flag_was,
            sync,
        })
    }

    /// Push the current subscription to the backend, failing if it can't be.
    /// Returns false when there is nothing to push.
    pub async fn sync_now(&self) -> Result<bool> {
        self.ensure_supported()?;
        let (_, subscription) = self.current_subscription().await?;
        match subscription {
            Some(subscription) => {
                self.sync.try_push(&subscription).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn get_preferences(&self) -> Result<PreferencesResponse> {
        self.sync.connection().get_preferences().await
    }

    pub async fn set_preferences(&self, preferences: &BTreeMap<String, bool>) -> Result<()> {
        self.sync.connection().set_preferences(preferences).await
    }

    /// Returns false, without calling the backend, when rate limited. Only
    /// pushes the backend accepted count against the limit.
    pub async fn send_test_notification(&self) -> Result<bool> {
        if !self.send_test_limiter.allows(&self.store) {
            info!("test push refused, too many sent recently");
            return Ok(false);
        }
        self.sync.connection().send_test().await?;
        self.send_test_limiter.record(&self.store);
        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::internal::communications::{MockConnection, SubscriptionRecord};
    use crate::internal::platform::MockPlatform;
    use crate::internal::storage::Store;
    use crate::internal::vapid::{MockKeyCache, VapidKeyCache};
    use crate::testing::{FakePlatform, RecordingConnection, FAKE_ENDPOINT, FAKE_VAPID_KEY};
    use mockall::predicate::eq;

    type TestManager<Co, K = VapidKeyCache> = SubscriptionManager<FakePlatform, Co, Store, K>;

    fn manager<Co: Connection>(platform: &FakePlatform, connection: Co) -> TestManager<Co> {
        crate::error::init_for_tests();
        SubscriptionManager::new(
            platform.clone(),
            connection,
            Store::open_in_memory().unwrap(),
            VapidKeyCache::new(),
            &PushConfiguration::default(),
        )
    }

    #[test]
    fn test_fresh_install() {
        let platform = FakePlatform::new();
        let mut connection = MockConnection::new();
        connection
            .expect_fetch_vapid_key()
            .times(1)
            .returning(|| Ok(FAKE_VAPID_KEY.to_string()));
        connection
            .expect_subscribe()
            .withf(|record: &SubscriptionRecord| record.endpoint == FAKE_ENDPOINT)
            .times(1)
            .returning(|_| Ok(()));

        let m = manager(&platform, connection);
        assert_eq!(m.state(), ManagerState::NoSubscription);
        assert!(!m.is_activated().unwrap());

        let response = pollster::block_on(m.subscribe()).unwrap();
        assert_eq!(response.subscription.endpoint, "https://push.example/abc123");
        assert!(!response.reused);
        assert_eq!(response.sync, SyncStatus::Synced);
        assert_eq!(platform.prompt_count(), 1);
        assert_eq!(platform.register_count(), 1);
        assert_eq!(
            platform.last_application_server_key().map(|k| k.len()),
            Some(65)
        );
        assert!(m.is_activated().unwrap());
        assert_eq!(m.state(), ManagerState::Subscribed);
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let platform = FakePlatform::new();
        let connection = RecordingConnection::new();
        let m = manager(&platform, connection.clone());

        let first = pollster::block_on(m.subscribe()).unwrap();
        let second = pollster::block_on(m.subscribe()).unwrap();
        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(first.subscription, second.subscription);
        assert_eq!(platform.subscribe_count(), 1);
        // the second call reused the subscription without touching the key.
        assert_eq!(connection.key_fetch_count(), 1);
        // but the server record still gets refreshed.
        assert_eq!(connection.pushed().len(), 2);
        // the permission was settled by the first prompt.
        assert_eq!(platform.prompt_count(), 1);
    }

    #[test]
    fn test_existing_subscription_skips_key_fetch() {
        let platform = FakePlatform::new().with_subscription();
        let mut connection = MockConnection::new();
        connection.expect_fetch_vapid_key().times(0);
        connection.expect_subscribe().times(1).returning(|_| Ok(()));
        let mut cache = MockKeyCache::new();
        cache.expect_get().times(0);
        cache.expect_set().times(0);

        let m = SubscriptionManager::new(
            platform.clone(),
            connection,
            Store::open_in_memory().unwrap(),
            cache,
            &PushConfiguration::default(),
        );
        let response = pollster::block_on(m.subscribe()).unwrap();
        assert!(response.reused);
        assert_eq!(platform.subscribe_count(), 0);
        assert_eq!(platform.prompt_count(), 0);
    }

    #[test]
    fn test_sync_failure_isolated() {
        let platform = FakePlatform::new();
        let connection = RecordingConnection::new();
        connection.fail_sync(true);
        let m = manager(&platform, connection.clone());

        let response = pollster::block_on(m.subscribe()).unwrap();
        assert!(response.sync.is_degraded());
        assert!(pollster::block_on(m.is_subscribed()).unwrap());
        assert!(m.is_activated().unwrap());
        assert_eq!(m.state(), ManagerState::Subscribed);

        // an explicit sync reports the failure.
        let err = pollster::block_on(m.sync_now()).unwrap_err();
        assert!(matches!(err, Error::CommunicationServer(_)));
        connection.fail_sync(false);
        assert!(pollster::block_on(m.sync_now()).unwrap());
    }

    #[test]
    fn test_unsubscribe_without_subscription() {
        let platform = FakePlatform::new().with_permission(PermissionState::Granted);
        let mut connection = MockConnection::new();
        connection.expect_unsubscribe().times(0);
        let m = manager(&platform, connection);
        m.store.set_push_activated(true).unwrap();

        let response = pollster::block_on(m.unsubscribe()).unwrap();
        assert!(!response.removed);
        assert_eq!(response.sync, SyncStatus::NotAttempted);
        assert_eq!(platform.unsubscribe_count(), 0);
        assert!(!m.is_activated().unwrap());
        assert_eq!(m.state(), ManagerState::NoSubscription);
    }

    #[test]
    fn test_unsubscribe() {
        let platform = FakePlatform::new().with_subscription();
        let mut connection = MockConnection::new();
        connection
            .expect_unsubscribe()
            .with(eq(SubscriptionRecord::for_unsubscribe(
                &platform.current_subscription().unwrap(),
            )))
            .times(1)
            .returning(|_| Err(Error::Transport("offline".to_string())));
        let m = manager(&platform, connection);
        m.store.set_push_activated(true).unwrap();

        let response = pollster::block_on(m.unsubscribe()).unwrap();
        assert!(response.removed);
        assert!(response.sync.is_degraded());
        assert!(platform.current_subscription().is_none());
        assert!(!m.is_activated().unwrap());
        assert!(!pollster::block_on(m.is_subscribed()).unwrap());
    }

    #[test]
    fn test_unsubscribe_declined_keeps_flag() {
        let platform = FakePlatform::new()
            .with_subscription()
            .declining_unsubscribe();
        let connection = RecordingConnection::new();
        let m = manager(&platform, connection);
        m.store.set_push_activated(true).unwrap();

        let err = pollster::block_on(m.unsubscribe()).unwrap_err();
        assert!(matches!(err, Error::Unsubscribe(_)));
        assert_eq!(m.state(), ManagerState::Subscribed);
        assert!(m.is_activated().unwrap());
        assert!(pollster::block_on(m.is_subscribed()).unwrap());
    }

    #[test]
    fn test_denied_makes_no_network_calls() {
        let platform = FakePlatform::new().with_permission(PermissionState::Denied);
        let connection = RecordingConnection::new();
        let m = manager(&platform, connection.clone());

        let err = pollster::block_on(m.subscribe()).unwrap_err();
        assert!(matches!(
            err,
            Error::PermissionDenied(PermissionState::Denied)
        ));
        assert_eq!(connection.network_calls(), 0);
        assert_eq!(platform.prompt_count(), 0);
        assert_eq!(platform.register_count(), 0);
        assert!(!m.is_activated().unwrap());
        assert_eq!(m.state(), ManagerState::NoSubscription);
    }

    #[test]
    fn test_dismissed_prompt() {
        let platform = FakePlatform::new().answering(PermissionState::Default);
        let connection = RecordingConnection::new();
        let m = manager(&platform, connection.clone());

        let err = pollster::block_on(m.subscribe()).unwrap_err();
        assert!(matches!(
            err,
            Error::PermissionDenied(PermissionState::Default)
        ));
        assert_eq!(platform.prompt_count(), 1);
        assert_eq!(connection.network_calls(), 0);
    }

    #[test]
    fn test_unsupported() {
        let platform = FakePlatform::new().unsupported();
        let connection = RecordingConnection::new();
        let m = manager(&platform, connection.clone());

        assert!(!m.is_supported());
        assert!(matches!(
            pollster::block_on(m.subscribe()),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            pollster::block_on(m.unsubscribe()),
            Err(Error::Unsupported(_))
        ));
        assert!(!pollster::block_on(m.is_subscribed()).unwrap());
        assert_eq!(platform.prompt_count(), 0);
        assert_eq!(connection.network_calls(), 0);
    }

    #[test]
    fn test_worker_failure() {
        let platform = FakePlatform::new().failing_registration("insecure origin");
        let connection = RecordingConnection::new();
        let m = manager(&platform, connection.clone());

        let err = pollster::block_on(m.subscribe()).unwrap_err();
        assert!(matches!(err, Error::WorkerRegistration(_)));
        assert_eq!(connection.network_calls(), 0);
        assert!(!m.is_activated().unwrap());
        assert_eq!(m.state(), ManagerState::NoSubscription);
    }

    #[test]
    fn test_key_fetch_failure_then_retry() {
        let platform = FakePlatform::new();
        let connection = RecordingConnection::new();
        connection.fail_key_fetch(true);
        let m = manager(&platform, connection.clone());

        let err = pollster::block_on(m.subscribe()).unwrap_err();
        assert!(matches!(err, Error::KeyFetch(_)));
        assert_eq!(platform.subscribe_count(), 0);
        assert!(!m.is_activated().unwrap());

        connection.fail_key_fetch(false);
        pollster::block_on(m.subscribe()).unwrap();
        assert_eq!(connection.key_fetch_count(), 2);
        assert!(m.is_activated().unwrap());
    }

    #[test]
    fn test_creation_failure_leaves_no_subscription() {
        let platform = FakePlatform::new().failing_subscribe("bad key");
        let connection = RecordingConnection::new();
        let m = manager(&platform, connection.clone());

        let err = pollster::block_on(m.subscribe()).unwrap_err();
        assert!(matches!(err, Error::SubscriptionCreation(reason) if reason.contains("bad key")));
        assert!(connection.pushed().is_empty());
        assert!(!m.is_activated().unwrap());
        assert!(!pollster::block_on(m.is_subscribed()).unwrap());
    }

    #[test]
    fn test_reconcile() {
        let platform = FakePlatform::new().with_subscription();
        let connection = RecordingConnection::new();
        let m = manager(&platform, connection.clone());

        let report = pollster::block_on(m.reconcile(false)).unwrap();
        assert!(report.subscribed);
        assert!(!report.flag_was);
        assert_eq!(report.sync, SyncStatus::Synced);
        assert!(m.is_activated().unwrap());
        assert_eq!(m.state(), ManagerState::Subscribed);

        // rate limited to once a day unless forced.
        let report = pollster::block_on(m.reconcile(false)).unwrap();
        assert!(report.flag_was);
        assert_eq!(report.sync, SyncStatus::NotAttempted);
        let report = pollster::block_on(m.reconcile(true)).unwrap();
        assert_eq!(report.sync, SyncStatus::Synced);
        assert_eq!(connection.pushed().len(), 2);

        // the subscription vanished behind our back.
        platform.drop_subscription();
        let report = pollster::block_on(m.reconcile(false)).unwrap();
        assert!(!report.subscribed);
        assert!(report.flag_was);
        assert!(!m.is_activated().unwrap());
        assert_eq!(m.state(), ManagerState::NoSubscription);
        assert_eq!(platform.prompt_count(), 0);
    }

    #[test]
    fn test_reconcile_without_permission_never_prompts() {
        let platform = FakePlatform::new();
        let connection = RecordingConnection::new();
        let m = manager(&platform, connection.clone());
        m.store.set_push_activated(true).unwrap();

        let report = pollster::block_on(m.reconcile(true)).unwrap();
        assert!(!report.subscribed);
        assert!(report.flag_was);
        assert_eq!(platform.prompt_count(), 0);
        assert_eq!(platform.register_count(), 0);
        assert!(!m.is_activated().unwrap());
    }

    #[test]
    fn test_send_test_notification_rate_limited() {
        let platform = FakePlatform::new();
        let connection = RecordingConnection::new();
        let m = manager(&platform, connection.clone());

        for _ in 0..SEND_TEST_MAX_CALLS {
            assert!(pollster::block_on(m.send_test_notification()).unwrap());
        }
        assert!(!pollster::block_on(m.send_test_notification()).unwrap());
        assert_eq!(connection.tests_sent(), u32::from(SEND_TEST_MAX_CALLS));
    }

    #[test]
    fn test_failed_test_push_keeps_quota() {
        let platform = FakePlatform::new();
        let mut connection = MockConnection::new();
        let mut seq = mockall::Sequence::new();
        connection
            .expect_send_test()
            .times(SEND_TEST_MAX_CALLS as usize + 1)
            .in_sequence(&mut seq)
            .returning(|| Err(Error::Unauthorized("no token".to_string())));
        connection
            .expect_send_test()
            .times(SEND_TEST_MAX_CALLS as usize)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        let m = manager(&platform, connection);

        for _ in 0..=SEND_TEST_MAX_CALLS {
            let err = pollster::block_on(m.send_test_notification()).unwrap_err();
            assert!(matches!(err, Error::Unauthorized(_)));
        }
        for _ in 0..SEND_TEST_MAX_CALLS {
            assert!(pollster::block_on(m.send_test_notification()).unwrap());
        }
        // the limit is hit without another backend call.
        assert!(!pollster::block_on(m.send_test_notification()).unwrap());
    }

    #[test]
    fn test_subscribe_steps_are_sequential() {
        let mut seq = mockall::Sequence::new();
        let mut platform = MockPlatform::new();
        let mut connection = MockConnection::new();
        let registration = WorkerRegistration {
            scope: "https://example.com/".to_string(),
            script_url: "/sw.js".to_string(),
        };
        let created = PushSubscription {
            endpoint: FAKE_ENDPOINT.to_string(),
            keys: crate::KeyInfo {
                p256dh: "p256dh".to_string(),
                auth: "auth".to_string(),
            },
        };

        platform.expect_is_supported().return_const(true);
        platform
            .expect_permission_state()
            .return_const(PermissionState::Default);
        platform
            .expect_request_permission()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(PermissionState::Granted);
        let reg = registration.clone();
        platform
            .expect_register_worker()
            .with(eq("/sw.js"), eq("/"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _| Ok(reg.clone()));
        platform
            .expect_get_subscription()
            .with(eq(registration.clone()))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(None));
        connection
            .expect_fetch_vapid_key()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(FAKE_VAPID_KEY.to_string()));
        let sub = created.clone();
        platform
            .expect_subscribe()
            .withf(|_, key| key.len() == 65)
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _| Ok(sub.clone()));
        connection
            .expect_subscribe()
            .withf(|record: &SubscriptionRecord| record.endpoint == FAKE_ENDPOINT)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let m = SubscriptionManager::new(
            platform,
            connection,
            Store::open_in_memory().unwrap(),
            VapidKeyCache::new(),
            &PushConfiguration::default(),
        );
        let response = pollster::block_on(m.subscribe()).unwrap();
        assert_eq!(response.subscription, created);
        assert!(!response.reused);
        assert!(m.is_activated().unwrap());
    }

    #[test]
    fn test_concurrent_subscribes_converge() {
        let platform = FakePlatform::new();
        let connection = RecordingConnection::new();
        let m = manager(&platform, connection.clone());

        let (first, second) =
            pollster::block_on(futures::future::join(m.subscribe(), m.subscribe()));
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(first.subscription.endpoint, second.subscription.endpoint);
        assert!(platform.subscribe_count() <= 1);
        assert_eq!(
            platform.current_subscription().map(|s| s.endpoint),
            Some(FAKE_ENDPOINT.to_string())
        );
        assert_eq!(platform.prompt_count(), 1);
        assert_eq!(m.state(), ManagerState::Subscribed);
        assert!(m.is_activated().unwrap());
    }

    #[test]
    fn test_preferences() {
        let platform = FakePlatform::new();
        let connection = RecordingConnection::new();
        let m = manager(&platform, connection);

        let mut prefs = BTreeMap::new();
        prefs.insert("claim_updates".to_string(), true);
        prefs.insert("digest".to_string(), false);
        pollster::block_on(m.set_preferences(&prefs)).unwrap();
        let response = pollster::block_on(m.get_preferences()).unwrap();
        assert_eq!(response.preferences.len(), 2);
        assert!(response
            .preferences
            .iter()
            .any(|p| p.key == "claim_updates" && p.enabled));
    }
}
