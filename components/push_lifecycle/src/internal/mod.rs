/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

pub mod codec;
pub mod communications;
pub mod config;
pub mod permission;
pub mod platform;
pub mod rate_limiter;
pub mod storage;
pub mod subscription_manager;
pub mod sync;
pub mod vapid;
#[cfg(all(target_arch = "wasm32", feature = "web"))]
pub mod web;
pub mod worker;

pub use subscription_manager::{ManagerState, SubscriptionManager};
