/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The application server (VAPID) public key and the cache that holds it.
//!
//! The key is fetched from the backend at most once per process: it never
//! changes while we run, so a populated cache is never invalidated. A failed
//! fetch leaves the cache empty and the next caller simply fetches again.

use std::{fmt, sync::Arc};

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::{debug, Error, Result};
use crate::internal::codec;
use crate::internal::communications::Connection;

#[derive(Clone, PartialEq, Eq)]
pub struct VapidKey(Vec<u8>);

impl VapidKey {
    pub fn from_base64url(encoded: &str) -> Result<Self> {
        Ok(Self(codec::decode(encoded)?))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for VapidKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for VapidKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VapidKey({})", codec::encode(&self.0))
    }
}

/// Storage for the key with the lifecycle `empty -> populated`.
#[cfg_attr(test, mockall::automock)]
pub trait KeyCache {
    fn get(&self) -> Option<VapidKey>;
    fn set(&self, key: VapidKey);
}

static PROCESS_CACHE: Lazy<VapidKeyCache> = Lazy::new(VapidKeyCache::new);

/// The production [`KeyCache`]. Clones share the same slot.
#[derive(Clone, Default)]
pub struct VapidKeyCache {
    key: Arc<RwLock<Option<VapidKey>>>,
}

impl VapidKeyCache {
    /// A new, empty cache not shared with anyone.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache shared by everything in this process.
    pub fn shared() -> Self {
        PROCESS_CACHE.clone()
    }
}

impl KeyCache for VapidKeyCache {
    fn get(&self) -> Option<VapidKey> {
        self.key.read().clone()
    }

    fn set(&self, key: VapidKey) {
        // Two racing first fetches both land here; the key is identical, so
        // the last write winning is harmless.
        *self.key.write() = Some(key);
    }
}

/// Return the cached key, fetching and decoding it on first use.
pub async fn get_or_fetch<K, Co>(cache: &K, connection: &Co) -> Result<VapidKey>
where
    K: KeyCache + ?Sized,
    Co: Connection + ?Sized,
{
    if let Some(key) = cache.get() {
        return Ok(key);
    }
    debug!("fetching application server key");
    let encoded = connection
        .fetch_vapid_key()
        .await
        .map_err(|e| Error::KeyFetch(e.to_string()))?;
    let key = VapidKey::from_base64url(&encoded)?;
    cache.set(key.clone());
    Ok(key)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::internal::communications::MockConnection;

    const PUB_KEY_RAW: &str =
        "BBcJdfs1GtMyymFTtty6lIGWRFXrEtJP40Df0gOvRDR4D8CKVgqE6vlYR7tCYksIRdKD1MxDPhQVmKLnzuife50";

    #[test]
    fn test_fetches_once() -> Result<()> {
        let mut connection = MockConnection::new();
        connection
            .expect_fetch_vapid_key()
            .times(1)
            .returning(|| Ok(PUB_KEY_RAW.to_string()));

        let cache = VapidKeyCache::new();
        let first = pollster::block_on(get_or_fetch(&cache, &connection))?;
        let second = pollster::block_on(get_or_fetch(&cache, &connection))?;
        assert_eq!(first, second);
        assert_eq!(first.as_bytes().len(), 65);
        Ok(())
    }

    #[test]
    fn test_no_negative_caching() -> Result<()> {
        let mut connection = MockConnection::new();
        let mut seq = mockall::Sequence::new();
        connection
            .expect_fetch_vapid_key()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(Error::CommunicationServer("unavailable".to_string())));
        connection
            .expect_fetch_vapid_key()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(PUB_KEY_RAW.to_string()));

        let cache = VapidKeyCache::new();
        let err = pollster::block_on(get_or_fetch(&cache, &connection)).unwrap_err();
        assert!(matches!(err, Error::KeyFetch(_)));
        assert!(cache.get().is_none());

        pollster::block_on(get_or_fetch(&cache, &connection))?;
        assert!(cache.get().is_some());
        Ok(())
    }

    #[test]
    fn test_malformed_key_not_cached() {
        let mut connection = MockConnection::new();
        connection
            .expect_fetch_vapid_key()
            .times(1)
            .returning(|| Ok("%%%".to_string()));

        let cache = VapidKeyCache::new();
        let err = pollster::block_on(get_or_fetch(&cache, &connection)).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
        assert!(cache.get().is_none());
    }

    #[test]
    fn test_cached_key_skips_network() -> Result<()> {
        // No expectations: any call on the connection fails the test.
        let connection = MockConnection::new();
        let mut cache = MockKeyCache::new();
        cache
            .expect_get()
            .times(1)
            .returning(|| Some(VapidKey::from(vec![4, 1, 2, 3])));
        cache.expect_set().times(0);

        let key = pollster::block_on(get_or_fetch(&cache, &connection))?;
        assert_eq!(key.as_bytes(), &[4, 1, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_clones_share_state() {
        let cache = VapidKeyCache::new();
        let other = cache.clone();
        cache.set(VapidKey::from(vec![1]));
        assert_eq!(other.get(), Some(VapidKey::from(vec![1])));
        assert!(VapidKeyCache::new().get().is_none());
    }
}
