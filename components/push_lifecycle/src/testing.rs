/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Stateful fakes for the [`Platform`] and [`Connection`] seams.
//!
//! Unlike the mocks, these keep state between calls the way a browser and a
//! backend would, so scenario tests can run a whole lifecycle and then look at
//! what happened. Clones share state, which lets a test hand one clone to the
//! manager and keep another to inspect.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::{
    Connection, KeyInfo, NotificationPreference, PermissionState, Platform, PreferencesResponse,
    PushSubscription, SubscriptionRecord, WorkerRegistration,
};

pub const FAKE_ENDPOINT: &str = "https://push.example/abc123";
pub const FAKE_P256DH: &str =
    "BBcJdfs1GtMyymFTtty6lIGWRFXrEtJP40Df0gOvRDR4D8CKVgqE6vlYR7tCYksIRdKD1MxDPhQVmKLnzuife50";
pub const FAKE_AUTH: &str = "LsuUOBKVQRY6-l7_Ajo-Ag";
pub const FAKE_VAPID_KEY: &str =
    "BEl62iUYgUivxIkv69yViEuiBIa40HI80NM9LdNnC_NcSPMpzIIoSr8Kjmzp_mfrrk-F5yh2KhFpD8l7Ygv0QNg";

struct PlatformState {
    supported: bool,
    permission: Cell<PermissionState>,
    prompt_answer: PermissionState,
    registration_error: Option<String>,
    subscribe_error: Option<String>,
    decline_unsubscribe: bool,
    subscription: RefCell<Option<PushSubscription>>,
    last_key: RefCell<Option<Vec<u8>>>,
    prompts: Cell<u32>,
    registers: Cell<u32>,
    subscribes: Cell<u32>,
    unsubscribes: Cell<u32>,
}

/// A browser that grants whatever it was told to grant.
///
/// The platform enforces a single subscription per registration: subscribing
/// while one exists hands back the existing one.
#[derive(Clone)]
pub struct FakePlatform {
    state: Rc<PlatformState>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePlatform {
    /// Supported, permission `Default`, and a prompt the user accepts.
    pub fn new() -> Self {
        Self {
            state: Rc::new(PlatformState {
                supported: true,
                permission: Cell::new(PermissionState::Default),
                prompt_answer: PermissionState::Granted,
                registration_error: None,
                subscribe_error: None,
                decline_unsubscribe: false,
                subscription: RefCell::new(None),
                last_key: RefCell::new(None),
                prompts: Cell::new(0),
                registers: Cell::new(0),
                subscribes: Cell::new(0),
                unsubscribes: Cell::new(0),
            }),
        }
    }

    fn modify(self, f: impl FnOnce(&mut PlatformState)) -> Self {
        let mut state = match Rc::try_unwrap(self.state) {
            Ok(state) => state,
            Err(_) => panic!("configure the fake before cloning it"),
        };
        f(&mut state);
        Self {
            state: Rc::new(state),
        }
    }

    pub fn with_permission(self, permission: PermissionState) -> Self {
        self.modify(|s| s.permission.set(permission))
    }

    /// What the prompt resolves to.
    pub fn answering(self, answer: PermissionState) -> Self {
        self.modify(|s| s.prompt_answer = answer)
    }

    pub fn unsupported(self) -> Self {
        self.modify(|s| s.supported = false)
    }

    /// Start with a live subscription, as after a previous session.
    pub fn with_subscription(self) -> Self {
        self.modify(|s| {
            s.permission.set(PermissionState::Granted);
            *s.subscription.borrow_mut() = Some(fake_subscription());
        })
    }

    pub fn failing_registration(self, reason: &str) -> Self {
        self.modify(|s| s.registration_error = Some(reason.to_owned()))
    }

    pub fn failing_subscribe(self, reason: &str) -> Self {
        self.modify(|s| s.subscribe_error = Some(reason.to_owned()))
    }

    /// The platform reports `false` from unsubscribe and keeps the subscription.
    pub fn declining_unsubscribe(self) -> Self {
        self.modify(|s| s.decline_unsubscribe = true)
    }

    pub fn prompt_count(&self) -> u32 {
        self.state.prompts.get()
    }

    pub fn register_count(&self) -> u32 {
        self.state.registers.get()
    }

    pub fn subscribe_count(&self) -> u32 {
        self.state.subscribes.get()
    }

    pub fn unsubscribe_count(&self) -> u32 {
        self.state.unsubscribes.get()
    }

    pub fn current_subscription(&self) -> Option<PushSubscription> {
        self.state.subscription.borrow().clone()
    }

    /// The decoded server key passed to the last subscribe call.
    pub fn last_application_server_key(&self) -> Option<Vec<u8>> {
        self.state.last_key.borrow().clone()
    }

    /// Simulate the user clearing site data behind our back.
    pub fn drop_subscription(&self) {
        self.state.subscription.borrow_mut().take();
    }
}

fn fake_subscription() -> PushSubscription {
    PushSubscription {
        endpoint: FAKE_ENDPOINT.to_owned(),
        keys: KeyInfo {
            p256dh: FAKE_P256DH.to_owned(),
            auth: FAKE_AUTH.to_owned(),
        },
    }
}

#[async_trait(?Send)]
impl Platform for FakePlatform {
    fn is_supported(&self) -> bool {
        self.state.supported
    }

    fn permission_state(&self) -> PermissionState {
        self.state.permission.get()
    }

    async fn request_permission(&self) -> PermissionState {
        let s = &self.state;
        s.prompts.set(s.prompts.get() + 1);
        s.permission.set(s.prompt_answer);
        s.prompt_answer
    }

    async fn register_worker(&self, script_path: &str, scope: &str) -> Result<WorkerRegistration> {
        let s = &self.state;
        s.registers.set(s.registers.get() + 1);
        if let Some(reason) = &s.registration_error {
            return Err(Error::Platform(reason.clone()));
        }
        Ok(WorkerRegistration {
            scope: scope.to_owned(),
            script_url: script_path.to_owned(),
        })
    }

    async fn get_subscription(
        &self,
        _registration: &WorkerRegistration,
    ) -> Result<Option<PushSubscription>> {
        Ok(self.current_subscription())
    }

    async fn subscribe(
        &self,
        _registration: &WorkerRegistration,
        application_server_key: &[u8],
    ) -> Result<PushSubscription> {
        let s = &self.state;
        s.subscribes.set(s.subscribes.get() + 1);
        *s.last_key.borrow_mut() = Some(application_server_key.to_vec());
        if let Some(reason) = &s.subscribe_error {
            return Err(Error::Platform(reason.clone()));
        }
        let mut current = s.subscription.borrow_mut();
        Ok(current.get_or_insert_with(fake_subscription).clone())
    }

    async fn unsubscribe(&self, _registration: &WorkerRegistration) -> Result<bool> {
        let s = &self.state;
        s.unsubscribes.set(s.unsubscribes.get() + 1);
        if s.decline_unsubscribe {
            return Ok(false);
        }
        Ok(s.subscription.borrow_mut().take().is_some())
    }
}

#[derive(Default)]
struct Recorded {
    vapid_key: RefCell<Option<String>>,
    key_fetches: Cell<u32>,
    pushed: RefCell<Vec<SubscriptionRecord>>,
    removed: RefCell<Vec<SubscriptionRecord>>,
    preferences: RefCell<BTreeMap<String, bool>>,
    tests_sent: Cell<u32>,
    fail_key: Cell<bool>,
    fail_sync: Cell<bool>,
}

/// A backend that remembers every call made to it.
#[derive(Clone)]
pub struct RecordingConnection {
    recorded: Rc<Recorded>,
}

impl Default for RecordingConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingConnection {
    pub fn new() -> Self {
        let recorded = Recorded::default();
        *recorded.vapid_key.borrow_mut() = Some(FAKE_VAPID_KEY.to_owned());
        Self {
            recorded: Rc::new(recorded),
        }
    }

    /// The backend answers the key route with `key`.
    pub fn set_vapid_key(&self, key: &str) {
        *self.recorded.vapid_key.borrow_mut() = Some(key.to_owned());
    }

    /// Make the key route fail (`true`) or recover (`false`).
    pub fn fail_key_fetch(&self, fail: bool) {
        self.recorded.fail_key.set(fail);
    }

    /// Make the subscribe and unsubscribe routes fail with a 5xx.
    pub fn fail_sync(&self, fail: bool) {
        self.recorded.fail_sync.set(fail);
    }

    pub fn key_fetch_count(&self) -> u32 {
        self.recorded.key_fetches.get()
    }

    pub fn pushed(&self) -> Vec<SubscriptionRecord> {
        self.recorded.pushed.borrow().clone()
    }

    pub fn removed(&self) -> Vec<SubscriptionRecord> {
        self.recorded.removed.borrow().clone()
    }

    pub fn tests_sent(&self) -> u32 {
        self.recorded.tests_sent.get()
    }

    /// Every call that would have gone over the network.
    pub fn network_calls(&self) -> usize {
        self.recorded.key_fetches.get() as usize
            + self.recorded.pushed.borrow().len()
            + self.recorded.removed.borrow().len()
            + self.recorded.tests_sent.get() as usize
    }
}

#[async_trait(?Send)]
impl Connection for RecordingConnection {
    async fn fetch_vapid_key(&self) -> Result<String> {
        let r = &self.recorded;
        r.key_fetches.set(r.key_fetches.get() + 1);
        if r.fail_key.get() {
            return Err(Error::CommunicationServer("key service unavailable".to_owned()));
        }
        r.vapid_key
            .borrow()
            .clone()
            .ok_or_else(|| Error::Communication("no key configured".to_owned()))
    }

    async fn subscribe(&self, record: &SubscriptionRecord) -> Result<()> {
        let r = &self.recorded;
        r.pushed.borrow_mut().push(record.clone());
        if r.fail_sync.get() {
            return Err(Error::CommunicationServer("backend unavailable".to_owned()));
        }
        Ok(())
    }

    async fn unsubscribe(&self, record: &SubscriptionRecord) -> Result<()> {
        let r = &self.recorded;
        r.removed.borrow_mut().push(record.clone());
        if r.fail_sync.get() {
            return Err(Error::CommunicationServer("backend unavailable".to_owned()));
        }
        Ok(())
    }

    async fn get_preferences(&self) -> Result<PreferencesResponse> {
        let current = self.recorded.preferences.borrow();
        Ok(PreferencesResponse {
            preferences: current
                .iter()
                .map(|(key, enabled)| NotificationPreference {
                    key: key.clone(),
                    enabled: *enabled,
                    nombre: key.clone(),
                    descripcion: String::new(),
                    destinatario: "user".to_owned(),
                })
                .collect(),
            defaults: BTreeMap::new(),
        })
    }

    async fn set_preferences(&self, preferences: &BTreeMap<String, bool>) -> Result<()> {
        self.recorded
            .preferences
            .borrow_mut()
            .extend(preferences.iter().map(|(k, v)| (k.clone(), *v)));
        Ok(())
    }

    async fn send_test(&self) -> Result<()> {
        let r = &self.recorded;
        r.tests_sent.set(r.tests_sent.get() + 1);
        Ok(())
    }
}
