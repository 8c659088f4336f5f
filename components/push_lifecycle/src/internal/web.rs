/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Browser implementations of [`Platform`] and [`Storage`].

use async_trait::async_trait;
use js_sys::{Object, Reflect, Uint8Array};
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    NotificationPermission, PushEncryptionKeyName, PushSubscriptionOptionsInit,
    RegistrationOptions, ServiceWorkerContainer, ServiceWorkerRegistration,
};

use crate::error::{debug, Error, Result};
use crate::internal::codec;
use crate::internal::platform::{Platform, WorkerRegistration};
use crate::internal::storage::Storage;
use crate::internal::worker::{wait_until_active, WorkerProgress};
use crate::{KeyInfo, PermissionState, PushSubscription};

const REGISTRATION_TIMEOUT_MS: u32 = 10_000;
const REGISTRATION_POLL_INTERVAL_MS: u32 = 100;

fn js_error(operation: &str, err: JsValue) -> Error {
    let detail = err.as_string().unwrap_or_else(|| format!("{:?}", err));
    Error::Platform(format!("{operation} failed: {detail}"))
}

fn window() -> Result<web_sys::Window> {
    web_sys::window().ok_or_else(|| Error::Unsupported("no window in this context".to_string()))
}

fn has_property(target: &JsValue, name: &str) -> bool {
    Reflect::get(target, &JsValue::from_str(name))
        .map(|value| !value.is_undefined() && !value.is_null())
        .unwrap_or(false)
}

fn parse_permission(value: &str) -> PermissionState {
    match value {
        "granted" => PermissionState::Granted,
        "denied" => PermissionState::Denied,
        _ => PermissionState::Default,
    }
}

/// The browser, reached through `window` and `navigator`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebPlatform;

impl WebPlatform {
    pub fn new() -> Self {
        Self
    }

    fn container(&self) -> Result<ServiceWorkerContainer> {
        let navigator = JsValue::from(window()?.navigator());
        let value = Reflect::get(&navigator, &JsValue::from_str("serviceWorker"))
            .map_err(|e| js_error("navigator.serviceWorker", e))?;
        if value.is_undefined() || value.is_null() {
            return Err(Error::Unsupported(
                "service workers are not available".to_string(),
            ));
        }
        value
            .dyn_into()
            .map_err(|_| Error::Unsupported("unexpected navigator.serviceWorker".to_string()))
    }

    /// Look the registration up by its scope. Unlike `serviceWorker.ready`
    /// this resolves whether or not the worker controls the current page.
    async fn lookup(&self, registration: &WorkerRegistration) -> Result<ServiceWorkerRegistration> {
        let promise = self
            .container()?
            .get_registration_with_document_url(&registration.scope);
        let value = JsFuture::from(promise)
            .await
            .map_err(|e| js_error("serviceWorker.getRegistration", e))?;
        if value.is_undefined() || value.is_null() {
            return Err(Error::WorkerRegistration(format!(
                "no worker registered for scope '{}'",
                registration.scope
            )));
        }
        value.dyn_into().map_err(|_| {
            Error::Platform("unexpected value from serviceWorker.getRegistration".to_string())
        })
    }

    async fn push_subscription(
        &self,
        registration: &WorkerRegistration,
    ) -> Result<Option<web_sys::PushSubscription>> {
        let push_manager = self
            .lookup(registration)
            .await?
            .push_manager()
            .map_err(|e| js_error("registration.pushManager", e))?;
        let promise = push_manager
            .get_subscription()
            .map_err(|e| js_error("pushManager.getSubscription", e))?;
        let value = JsFuture::from(promise)
            .await
            .map_err(|e| js_error("pushManager.getSubscription", e))?;
        if value.is_null() || value.is_undefined() {
            return Ok(None);
        }
        value.dyn_into().map(Some).map_err(|_| {
            Error::Platform("unexpected value from pushManager.getSubscription".to_string())
        })
    }
}

fn progress(registration: &ServiceWorkerRegistration) -> WorkerProgress {
    if registration.active().is_some() {
        WorkerProgress::Active
    } else if registration.installing().is_some() || registration.waiting().is_some() {
        WorkerProgress::Pending
    } else {
        WorkerProgress::Gone
    }
}

async fn sleep_ms(ms: u32) -> Result<()> {
    let window = window()?;
    let timeout = i32::try_from(ms).unwrap_or(i32::MAX);
    let promise = js_sys::Promise::new(&mut |resolve, _reject| {
        if let Err(e) =
            window.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, timeout)
        {
            debug!("setTimeout failed: {:?}", e);
            let _ = resolve.call0(&JsValue::UNDEFINED);
        }
    });
    JsFuture::from(promise)
        .await
        .map(|_| ())
        .map_err(|e| js_error("setTimeout", e))
}

fn subscription_key(
    subscription: &web_sys::PushSubscription,
    name: PushEncryptionKeyName,
) -> Result<String> {
    let buffer = subscription
        .get_key(name)
        .map_err(|e| js_error("subscription.getKey", e))?
        .ok_or_else(|| Error::Platform(format!("subscription has no {:?} key", name)))?;
    Ok(codec::encode(&Uint8Array::new(&buffer).to_vec()))
}

impl TryFrom<&web_sys::PushSubscription> for PushSubscription {
    type Error = Error;

    fn try_from(subscription: &web_sys::PushSubscription) -> Result<Self> {
        Ok(PushSubscription {
            endpoint: subscription.endpoint(),
            keys: KeyInfo {
                p256dh: subscription_key(subscription, PushEncryptionKeyName::P256dh)?,
                auth: subscription_key(subscription, PushEncryptionKeyName::Auth)?,
            },
        })
    }
}

#[async_trait(?Send)]
impl Platform for WebPlatform {
    fn is_supported(&self) -> bool {
        let Some(window) = web_sys::window() else {
            return false;
        };
        let navigator = JsValue::from(window.navigator());
        let window = JsValue::from(window);
        has_property(&navigator, "serviceWorker")
            && has_property(&window, "PushManager")
            && has_property(&window, "Notification")
    }

    fn permission_state(&self) -> PermissionState {
        match web_sys::Notification::permission() {
            NotificationPermission::Granted => PermissionState::Granted,
            NotificationPermission::Denied => PermissionState::Denied,
            _ => PermissionState::Default,
        }
    }

    async fn request_permission(&self) -> PermissionState {
        let promise = match web_sys::Notification::request_permission() {
            Ok(promise) => promise,
            Err(e) => {
                debug!("Notification.requestPermission threw: {:?}", e);
                return self.permission_state();
            }
        };
        match JsFuture::from(promise).await {
            Ok(value) => value
                .as_string()
                .map(|s| parse_permission(&s))
                .unwrap_or_else(|| self.permission_state()),
            Err(e) => {
                debug!("Notification.requestPermission rejected: {:?}", e);
                self.permission_state()
            }
        }
    }

    async fn register_worker(&self, script_path: &str, scope: &str) -> Result<WorkerRegistration> {
        let options = RegistrationOptions::new();
        options.set_scope(scope);
        let promise = self.container()?.register_with_options(script_path, &options);
        let registration: ServiceWorkerRegistration = JsFuture::from(promise)
            .await
            .map_err(|e| js_error("serviceWorker.register", e))?
            .dyn_into()
            .map_err(|_| {
                Error::Platform("unexpected value from serviceWorker.register".to_string())
            })?;
        wait_until_active(
            || progress(&registration),
            sleep_ms,
            REGISTRATION_TIMEOUT_MS,
            REGISTRATION_POLL_INTERVAL_MS,
        )
        .await?;
        Ok(WorkerRegistration {
            scope: registration.scope(),
            script_url: script_path.to_owned(),
        })
    }

    async fn get_subscription(
        &self,
        registration: &WorkerRegistration,
    ) -> Result<Option<PushSubscription>> {
        match self.push_subscription(registration).await? {
            Some(subscription) => Ok(Some(PushSubscription::try_from(&subscription)?)),
            None => Ok(None),
        }
    }

    async fn subscribe(
        &self,
        registration: &WorkerRegistration,
        application_server_key: &[u8],
    ) -> Result<PushSubscription> {
        let options = Object::new();
        let set = |name: &str, value: &JsValue| {
            Reflect::set(&options, &JsValue::from_str(name), value)
                .map_err(|e| js_error("building subscribe options", e))
        };
        set("userVisibleOnly", &JsValue::TRUE)?;
        set(
            "applicationServerKey",
            &Uint8Array::from(application_server_key).into(),
        )?;
        let options: PushSubscriptionOptionsInit = options.unchecked_into();

        let push_manager = self
            .lookup(registration)
            .await?
            .push_manager()
            .map_err(|e| js_error("registration.pushManager", e))?;
        let promise = push_manager
            .subscribe_with_options(&options)
            .map_err(|e| js_error("pushManager.subscribe", e))?;
        let subscription: web_sys::PushSubscription = JsFuture::from(promise)
            .await
            .map_err(|e| js_error("pushManager.subscribe", e))?
            .dyn_into()
            .map_err(|_| Error::Platform("unexpected value from pushManager.subscribe".to_string()))?;
        PushSubscription::try_from(&subscription)
    }

    async fn unsubscribe(&self, registration: &WorkerRegistration) -> Result<bool> {
        let Some(subscription) = self.push_subscription(registration).await? else {
            return Ok(false);
        };
        let promise = subscription
            .unsubscribe()
            .map_err(|e| js_error("subscription.unsubscribe", e))?;
        let value = JsFuture::from(promise)
            .await
            .map_err(|e| js_error("subscription.unsubscribe", e))?;
        Ok(value.as_bool().unwrap_or(false))
    }
}

/// [`Storage`] over the origin's `window.localStorage`.
pub struct WebStorage {
    storage: web_sys::Storage,
}

impl WebStorage {
    pub fn open() -> Result<Self> {
        let storage = window()?
            .local_storage()
            .map_err(|e| js_error("window.localStorage", e))?
            .ok_or_else(|| Error::Storage("localStorage is not available".to_string()))?;
        Ok(Self { storage })
    }
}

impl Storage for WebStorage {
    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.storage
            .get_item(key)
            .map_err(|e| Error::Storage(format!("localStorage.getItem: {:?}", e)))
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.storage
            .set_item(key, value)
            .map_err(|e| Error::Storage(format!("localStorage.setItem: {:?}", e)))
    }

    fn delete_meta(&self, key: &str) -> Result<()> {
        self.storage
            .remove_item(key)
            .map_err(|e| Error::Storage(format!("localStorage.removeItem: {:?}", e)))
    }
}
