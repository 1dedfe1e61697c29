use crate::db::{Database, Device, now_timestamp};
use crate::error::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

/// Create the device if unseen, otherwise refresh its name and last sync time.
///
/// An empty name never replaces a stored one. New devices start with full
/// sync disabled.
pub(crate) fn upsert_device_in(
    conn: &Connection,
    user_id: &str,
    device_id: &str,
    device_name: &str,
    now: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO devices (id, user_id, device_name, last_synced, created_at, sync)
         VALUES (?1, ?2, ?3, ?4, ?4, 0)
         ON CONFLICT(user_id, id) DO UPDATE SET
            device_name = CASE WHEN excluded.device_name <> '' THEN excluded.device_name
                               ELSE devices.device_name END,
            last_synced = excluded.last_synced",
        params![device_id, user_id, device_name, now],
    )?;
    Ok(())
}

impl Database {
    // ========== DEVICE OPERATIONS ==========

    /// Upsert a device and return its current row.
    pub fn upsert_device(&self, user_id: &str, device_id: &str, device_name: &str) -> Result<Device> {
        let conn = self.conn();
        upsert_device_in(&conn, user_id, device_id, device_name, now_timestamp())?;
        let device = conn.query_row(
            "SELECT id, user_id, device_name, last_synced, created_at, sync
             FROM devices WHERE user_id = ?1 AND id = ?2",
            params![user_id, device_id],
            device_from_row,
        )?;
        Ok(device)
    }

    /// Get a device of a user.
    pub fn get_device(&self, user_id: &str, device_id: &str) -> Result<Option<Device>> {
        let conn = self.conn();
        let device = conn
            .query_row(
                "SELECT id, user_id, device_name, last_synced, created_at, sync
                 FROM devices WHERE user_id = ?1 AND id = ?2",
                params![user_id, device_id],
                device_from_row,
            )
            .optional()?;
        Ok(device)
    }

    /// List devices of a user, most recently synced first.
    pub fn list_devices(&self, user_id: &str) -> Result<Vec<Device>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, device_name, last_synced, created_at, sync
             FROM devices WHERE user_id = ?1
             ORDER BY last_synced DESC, id",
        )?;

        let devices = stmt
            .query_map(params![user_id], device_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(devices)
    }

    /// Toggle the full-sync opt-in.
    pub fn set_device_sync(&self, user_id: &str, device_id: &str, enabled: bool) -> Result<bool> {
        let conn = self.conn();
        let rows = conn.execute(
            "UPDATE devices SET sync = ?3 WHERE user_id = ?1 AND id = ?2",
            params![user_id, device_id, enabled],
        )?;
        Ok(rows > 0)
    }
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        id: row.get(0)?,
        user_id: row.get(1)?,
        device_name: row.get(2)?,
        last_synced: row.get(3)?,
        created_at: row.get(4)?,
        sync: row.get(5)?,
    })
}
