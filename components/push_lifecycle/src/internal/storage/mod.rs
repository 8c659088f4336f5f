/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Handles the small amount of state we persist on the device.
//!
//! Mainly exposes a trait, [`Storage`], a key/value "meta" store, and a
//! concrete SQLite implementation of it, [`Store`].
//!
//! The only well known key is the "push activated on this device" flag. It is
//! a hint for the UI so it can avoid re-prompting; it is never proof of a
//! live subscription, which only the platform can give. The rate limiters keep
//! their counters here too.

use crate::error::Result;

#[cfg(not(target_arch = "wasm32"))]
mod db;
#[cfg(not(target_arch = "wasm32"))]
mod schema;

#[cfg(not(target_arch = "wasm32"))]
pub use self::db::PushDb as Store;

pub(crate) const PUSH_ACTIVATED_KEY: &str = "push_activated";

pub trait Storage {
    fn get_meta(&self, key: &str) -> Result<Option<String>>;
    fn set_meta(&self, key: &str, value: &str) -> Result<()>;
    fn delete_meta(&self, key: &str) -> Result<()>;

    /// Whether push was activated on this device. Missing or unreadable values
    /// read as `false`.
    fn get_push_activated(&self) -> Result<bool> {
        Ok(self.get_meta(PUSH_ACTIVATED_KEY)?.as_deref() == Some("true"))
    }

    fn set_push_activated(&self, activated: bool) -> Result<()> {
        self.set_meta(PUSH_ACTIVATED_KEY, if activated { "true" } else { "false" })
    }
}
