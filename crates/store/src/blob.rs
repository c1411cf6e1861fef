use rusqlite::{params, Connection, OptionalExtension, Transaction};
use sha2::{Digest, Sha256};

use sa_domain::Result;

use crate::schema::db_err;

/// Payloads above this size move out of the `events.payload` column and
/// into the content-addressed blob pool.
pub const INLINE_THRESHOLD: usize = 8 * 1024;

pub struct BlobStore;

impl BlobStore {
    /// Inserts `bytes` into the blob pool if no blob with the same hash
    /// exists yet, otherwise bumps its refcount. Returns the blob id.
    pub fn put_tx(tx: &Transaction, bytes: &[u8], mime_type: &str) -> Result<String> {
        let hash = hex::encode(Sha256::digest(bytes));
        let existing: Option<String> = tx
            .query_row("SELECT id FROM blobs WHERE hash = ?1", [&hash], |r| r.get(0))
            .optional()
            .map_err(db_err)?;
        if let Some(id) = existing {
            tx.execute("UPDATE blobs SET refcount = refcount + 1 WHERE id = ?1", [&id])
                .map_err(db_err)?;
            return Ok(id);
        }
        let id = sa_domain::event::new_id("blob");
        tx.execute(
            "INSERT INTO blobs (id, hash, bytes, mime_type, original_size, compressed_size, compression, refcount)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, NULL, 1)",
            params![id, hash, bytes, mime_type, bytes.len() as i64],
        )
        .map_err(db_err)?;
        Ok(id)
    }

    pub fn get(conn: &Connection, blob_id: &str) -> Result<Option<Vec<u8>>> {
        conn.query_row("SELECT bytes FROM blobs WHERE id = ?1", [blob_id], |r| r.get(0))
            .optional()
            .map_err(db_err)
    }

    /// Decrements refcount and deletes the row once it reaches zero.
    pub fn release(conn: &Connection, blob_id: &str) -> Result<()> {
        conn.execute(
            "UPDATE blobs SET refcount = refcount - 1 WHERE id = ?1",
            [blob_id],
        )
        .map_err(db_err)?;
        conn.execute("DELETE FROM blobs WHERE id = ?1 AND refcount <= 0", [blob_id])
            .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bytes_dedupe_to_one_blob_with_refcount_two() {
        let mut conn = Connection::open_in_memory().unwrap();
        crate::schema::run_migrations(&conn).unwrap();
        let tx = conn.transaction().unwrap();
        let id1 = BlobStore::put_tx(&tx, b"hello world", "text/plain").unwrap();
        let id2 = BlobStore::put_tx(&tx, b"hello world", "text/plain").unwrap();
        tx.commit().unwrap();
        assert_eq!(id1, id2);
        let refcount: i64 = conn
            .query_row("SELECT refcount FROM blobs WHERE id = ?1", [&id1], |r| r.get(0))
            .unwrap();
        assert_eq!(refcount, 2);
    }
}
