/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use rusqlite::Connection;

use crate::error::{info, warn, Result};

pub const END_VERSION: u32 = 2;

const CREATE_TABLE_META_SQL: &str = "
    CREATE TABLE IF NOT EXISTS meta_data (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    ) WITHOUT ROWID;
";

// Version 1 kept the flag under `push_enabled` as "1"/"0".
const UPGRADE_V1_SQL: &str = "
    INSERT OR REPLACE INTO meta_data (key, value)
        SELECT 'push_activated', CASE value WHEN '1' THEN 'true' ELSE 'false' END
        FROM meta_data WHERE key = 'push_enabled';
    DELETE FROM meta_data WHERE key = 'push_enabled';
";

/// Bring the schema up to [`END_VERSION`].
///
/// This is such a simple database that there is nothing else to set up: no
/// foreign keys, no temp tables and a handful of statements.
pub fn init(db: &Connection) -> Result<()> {
    let version: u32 = db.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version == END_VERSION {
        return Ok(());
    }
    if version > END_VERSION {
        warn!(
            "Loaded future schema version {} (we only understand version {}). \
             Optimistically carrying on",
            version, END_VERSION
        );
        return Ok(());
    }
    let tx = db.unchecked_transaction()?;
    tx.execute_batch(CREATE_TABLE_META_SQL)?;
    if version == 1 {
        info!("upgrading push db from version 1");
        tx.execute_batch(UPGRADE_V1_SQL)?;
    }
    tx.execute_batch(&format!("PRAGMA user_version = {}", END_VERSION))?;
    tx.commit()?;
    Ok(())
}
