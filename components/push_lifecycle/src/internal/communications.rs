/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Backend communications.
//!
//! The backend hands out the application server key, keeps the record of
//! which devices may receive pushes, stores per-user notification preferences
//! and can send a test push. [`Connection`] is that contract; [`ConnectHttp`]
//! speaks it as JSON over HTTP(S).

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::PushSubscription;

#[cfg(not(target_arch = "wasm32"))]
pub use http::ConnectHttp;

/// The server-side projection of a [`PushSubscription`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRecord {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    /// Only sent when registering; removal is keyed on the endpoint and keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl SubscriptionRecord {
    pub fn for_subscribe(subscription: &PushSubscription, user_agent: &str) -> Self {
        Self {
            user_agent: Some(user_agent.to_owned()),
            ..Self::for_unsubscribe(subscription)
        }
    }

    pub fn for_unsubscribe(subscription: &PushSubscription) -> Self {
        Self {
            endpoint: subscription.endpoint.clone(),
            p256dh: subscription.keys.p256dh.clone(),
            auth: subscription.keys.auth.clone(),
            user_agent: None,
        }
    }
}

/// One notification category a user can switch on or off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub key: String,
    pub enabled: bool,
    /// Display name.
    pub nombre: String,
    /// Display description.
    pub descripcion: String,
    /// Which audience the category targets.
    pub destinatario: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PreferencesResponse {
    pub preferences: Vec<NotificationPreference>,
    #[serde(default)]
    pub defaults: BTreeMap<String, bool>,
}

#[derive(Deserialize)]
pub(crate) struct VapidKeyResponse {
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

#[derive(Serialize)]
pub(crate) struct PreferencesUpdate<'a> {
    pub preferences: &'a BTreeMap<String, bool>,
}

/// A communication link to the subscription backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait(?Send)]
pub trait Connection {
    /// Fetch the base64url encoded application server public key.
    async fn fetch_vapid_key(&self) -> Result<String>;

    /// Create (or refresh) the server's record of this device.
    async fn subscribe(&self, record: &SubscriptionRecord) -> Result<()>;

    /// Drop the server's record of this device.
    async fn unsubscribe(&self, record: &SubscriptionRecord) -> Result<()>;

    async fn get_preferences(&self) -> Result<PreferencesResponse>;

    async fn set_preferences(&self, preferences: &BTreeMap<String, bool>) -> Result<()>;

    /// Ask the server to push a test message to the caller's own subscriptions.
    async fn send_test(&self) -> Result<()>;
}

#[cfg(not(target_arch = "wasm32"))]
mod http {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use hyper::{header, Method, StatusCode};
    use once_cell::sync::Lazy;
    use tokio::runtime::{Handle, Runtime};
    use serde::{de::DeserializeOwned, Deserialize, Serialize};
    use url::Url;

    use super::{
        Connection, PreferencesResponse, PreferencesUpdate, SubscriptionRecord, VapidKeyResponse,
    };
    use crate::error::{self, info, trace, Error};
    use crate::PushConfiguration;

    type Client =
        hyper::Client<hyper_tls::HttpsConnector<hyper::client::HttpConnector>, hyper::Body>;

    struct Response {
        status: StatusCode,
        body: Vec<u8>,
    }

    impl Response {
        fn json<T: DeserializeOwned>(&self) -> error::Result<T> {
            Ok(serde_json::from_slice(&self.body)?)
        }

        fn text(&self) -> String {
            String::from_utf8_lossy(&self.body).into_owned()
        }
    }

    // Built once and never dropped, so a connection can be dropped from
    // inside any async context.
    static RUNTIME: Lazy<std::io::Result<Runtime>> = Lazy::new(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
    });

    fn runtime_handle() -> error::Result<Handle> {
        RUNTIME
            .as_ref()
            .map(|runtime| runtime.handle().clone())
            .map_err(|e| Error::Transport(format!("could not start runtime: {e}")))
    }

    /// Connect to the backend over HTTP(S).
    ///
    /// Requests run on a process-wide single-worker tokio runtime, so callers
    /// can await them from any executor.
    pub struct ConnectHttp {
        base_url: Url,
        auth_token: Option<String>,
        timeout_ms: u32,
        runtime: Handle,
        client: Client,
    }

    impl ConnectHttp {
        pub fn connect(config: &PushConfiguration) -> error::Result<Self> {
            let base_url = Url::parse(&config.base_url())?;
            let runtime = runtime_handle()?;
            let client = hyper::Client::builder().build(hyper_tls::HttpsConnector::new());
            Ok(Self {
                base_url,
                auth_token: config.auth_token.clone(),
                timeout_ms: config.request_timeout_ms,
                runtime,
                client,
            })
        }

        fn check_response_error(&self, response: &Response) -> error::Result<()> {
            // The backend returns `{"error": "..."}` on failures, but we don't
            // insist on it.
            #[derive(Deserialize)]
            struct ResponseError {
                error: String,
            }
            let status = response.status;
            if status.is_success() {
                return Ok(());
            }
            let message = response
                .json::<ResponseError>()
                .map(|r| r.error)
                .unwrap_or_else(|_| response.text());
            if status.is_server_error() {
                return Err(Error::CommunicationServer(format!(
                    "General Server Error ({}): {}",
                    status.as_u16(),
                    message
                )));
            }
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(Error::Unauthorized(message));
            }
            Err(Error::Communication(format!(
                "Unhandled client error ({}): {}",
                status.as_u16(),
                message
            )))
        }

        async fn send<B: Serialize + ?Sized>(
            &self,
            method: Method,
            path: &str,
            body: Option<&B>,
        ) -> error::Result<Response> {
            let url = self.base_url.join(path)?;
            let mut builder = hyper::Request::builder()
                .method(method.clone())
                .uri(url.as_str())
                .header(header::ACCEPT, "application/json");
            if let Some(token) = &self.auth_token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
            }
            let payload = match body {
                Some(body) => {
                    builder = builder.header(header::CONTENT_TYPE, "application/json");
                    serde_json::to_vec(body)?
                }
                None => Vec::new(),
            };
            let request = builder
                .body(hyper::Body::from(payload))
                .map_err(|e| Error::Transport(e.to_string()))?;

            let client = self.client.clone();
            let timeout_ms = self.timeout_ms;
            let task = self.runtime.spawn(async move {
                let exchange = async {
                    let response = client.request(request).await?;
                    let status = response.status();
                    let body = hyper::body::to_bytes(response.into_body()).await?;
                    Ok::<_, hyper::Error>(Response {
                        status,
                        body: body.to_vec(),
                    })
                };
                if timeout_ms == 0 {
                    exchange.await.map_err(|e| Error::Transport(e.to_string()))
                } else {
                    let duration = Duration::from_millis(timeout_ms.into());
                    match tokio::time::timeout(duration, exchange).await {
                        Ok(result) => result.map_err(|e| Error::Transport(e.to_string())),
                        Err(_) => Err(Error::Transport("Request timeout".to_string())),
                    }
                }
            });
            let response = task
                .await
                .map_err(|e| Error::Transport(format!("error running tokio task: {e}")))??;
            info!("{} {} - {}", method, url, response.status);
            trace!("response text: {}", response.text());
            self.check_response_error(&response)?;
            Ok(response)
        }
    }

    #[async_trait(?Send)]
    impl Connection for ConnectHttp {
        async fn fetch_vapid_key(&self) -> error::Result<String> {
            let response = self.send::<()>(Method::GET, "/push/vapid-key", None).await?;
            let payload: VapidKeyResponse = response.json()?;
            Ok(payload.public_key)
        }

        async fn subscribe(&self, record: &SubscriptionRecord) -> error::Result<()> {
            self.send(Method::POST, "/push/subscribe", Some(record))
                .await?;
            Ok(())
        }

        async fn unsubscribe(&self, record: &SubscriptionRecord) -> error::Result<()> {
            self.send(Method::POST, "/push/unsubscribe", Some(record))
                .await?;
            Ok(())
        }

        async fn get_preferences(&self) -> error::Result<PreferencesResponse> {
            let response = self
                .send::<()>(Method::GET, "/push/preferences", None)
                .await?;
            response.json()
        }

        async fn set_preferences(&self, preferences: &BTreeMap<String, bool>) -> error::Result<()> {
            let body = PreferencesUpdate { preferences };
            self.send(Method::PUT, "/push/preferences", Some(&body))
                .await?;
            Ok(())
        }

        async fn send_test(&self) -> error::Result<()> {
            if self.auth_token.is_none() {
                return Err(Error::Unauthorized(
                    "sending a test push requires an auth token".to_string(),
                ));
            }
            self.send::<()>(Method::POST, "/push/test", None).await?;
            Ok(())
        }
    }

}
