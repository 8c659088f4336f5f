/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Provides configuration for the [PushManager](`crate::PushManager`)
//!

use std::{fmt::Display, str::FromStr};

use crate::error::Error;

pub const DEFAULT_WORKER_SCRIPT_PATH: &str = "/sw.js";
pub const DEFAULT_WORKER_SCOPE: &str = "/";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u32 = 10000;

#[derive(Clone, Debug)]
pub struct PushConfiguration {
    /// host name:port of the backend
    pub server_host: String,

    /// http protocol ("https" everywhere but local testing)
    pub http_protocol: Protocol,

    /// Well-known path of the background worker script
    pub worker_script_path: String,

    /// Scope the worker is registered for
    pub worker_scope: String,

    /// OS Path to the database holding the local flag
    pub database_path: String,

    /// Sent along with subscription records
    pub user_agent: String,

    /// Bearer token for authenticated endpoints
    pub auth_token: Option<String>,

    /// Timeout for a whole backend request in ms (0 indicates no timeout)
    pub request_timeout_ms: u32,
}

impl PushConfiguration {
    pub fn new(server_host: &str, database_path: &str) -> Self {
        Self {
            server_host: server_host.to_owned(),
            http_protocol: Protocol::default(),
            worker_script_path: DEFAULT_WORKER_SCRIPT_PATH.to_owned(),
            worker_scope: DEFAULT_WORKER_SCOPE.to_owned(),
            database_path: database_path.to_owned(),
            user_agent: format!("push_lifecycle/{}", env!("CARGO_PKG_VERSION")),
            auth_token: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}", self.http_protocol, self.server_host)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Protocol {
    #[default]
    Https,
    Http,
}

impl Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Protocol::Http => "http",
                Protocol::Https => "https",
            }
        )
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "http" => Protocol::Http,
            "https" => Protocol::Https,
            _ => return Err(Error::Config(format!("Invalid protocol '{}'", s))),
        })
    }
}

#[cfg(test)]
// To avoid a future footgun, the default implementation is only for tests
impl Default for PushConfiguration {
    fn default() -> PushConfiguration {
        PushConfiguration::new("push.example.com", "")
    }
}
