/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */
use std::{ops::Deref, path::Path};

use rusqlite::{named_params, Connection, OptionalExtension};

use crate::error::{debug, Error, Result};

use super::{schema, Storage};

pub struct PushDb {
    pub db: Connection,
}

impl PushDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        // By default, file open errors are StorageSqlErrors and aren't super helpful.
        // Instead, remap to Storage and provide the path to the file that couldn't be opened.
        let db = Connection::open(path).map_err(|orig| {
            Error::Storage(format!(
                "Could not open database file {:?} - {}",
                &path.as_os_str(),
                orig,
            ))
        })?;
        schema::init(&db)?;
        Ok(Self { db })
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        schema::init(&db)?;
        Ok(Self { db })
    }
}

impl Deref for PushDb {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        &self.db
    }
}

impl Storage for PushDb {
    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.query_row(
            "SELECT value FROM meta_data WHERE key = :key LIMIT 1",
            named_params! { ":key": key },
            |row| row.get(0),
        )
        .optional()
        .map_err(Error::StorageSql)
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        debug!("setting meta '{}' to '{}'", key, value);
        self.prepare_cached("INSERT OR REPLACE INTO meta_data (key, value) VALUES (:k, :v)")?
            .execute(named_params! { ":k": key, ":v": value })?;
        Ok(())
    }

    fn delete_meta(&self, key: &str) -> Result<()> {
        self.execute(
            "DELETE FROM meta_data WHERE key = :key",
            named_params! { ":key": key },
        )?;
        Ok(())
    }
}
