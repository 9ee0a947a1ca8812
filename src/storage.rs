//! Persistence for auction state
//!
//! The whole state (blocks, verifiers, request queues) is written as one
//! snapshot. `SqliteStore` replaces every table inside a single transaction,
//! so a reader never observes half of a write.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::block::DataBlock;
use crate::error::Result;
use crate::request::{RequestStatus, VerificationRequest};
use crate::verifier::{Credential, Verifier};

/// Point-in-time copy of everything the auction holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuctionSnapshot {
    pub blocks: Vec<DataBlock>,
    pub verifiers: Vec<Verifier>,
}

impl AuctionSnapshot {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.verifiers.is_empty()
    }
}

pub trait AuctionStore: Send + Sync {
    fn persist(&self, snapshot: &AuctionSnapshot) -> Result<()>;

    /// The last persisted snapshot, or an empty one.
    fn load(&self) -> Result<AuctionSnapshot>;
}

/// Keeps the last snapshot in memory. Used in tests and ephemeral servers.
#[derive(Default)]
pub struct MemoryStore {
    snapshot: Mutex<AuctionSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: AuctionSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }
}

impl AuctionStore for MemoryStore {
    fn persist(&self, snapshot: &AuctionSnapshot) -> Result<()> {
        *self.snapshot.lock() = snapshot.clone();
        Ok(())
    }

    fn load(&self) -> Result<AuctionSnapshot> {
        Ok(self.snapshot.lock().clone())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS blocks (
    position INTEGER PRIMARY KEY,
    block_id INTEGER NOT NULL UNIQUE,
    price REAL NOT NULL,
    base_reward_rate REAL NOT NULL,
    float_reward_rate REAL NOT NULL,
    min_reward REAL NOT NULL,
    max_reward REAL NOT NULL,
    creation_time INTEGER NOT NULL,
    deadline INTEGER NOT NULL,
    growth_speed REAL NOT NULL,
    verified INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS verifiers (
    position INTEGER PRIMARY KEY,
    verifier_id INTEGER NOT NULL UNIQUE,
    session_id TEXT NOT NULL,
    credential BLOB UNIQUE,
    bid_price REAL,
    total_score REAL NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS verification_requests (
    verifier_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    request_id TEXT NOT NULL UNIQUE,
    requester_public_key BLOB NOT NULL,
    verifier_public_key BLOB NOT NULL,
    verification_hash BLOB NOT NULL,
    hash_signature BLOB NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    PRIMARY KEY (verifier_id, position)
);
"#;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        info!("Opened auction database at {}", path.display());
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn load_requests(conn: &Connection, verifier_id: i64) -> Result<Vec<VerificationRequest>> {
        let mut stmt = conn.prepare(
            "SELECT request_id, requester_public_key, verifier_public_key, verification_hash, hash_signature, status
             FROM verification_requests WHERE verifier_id = ?1 ORDER BY position",
        )?;
        let requests = stmt
            .query_map(params![verifier_id], |row| {
                Ok(VerificationRequest {
                    request_id: row.get::<_, String>(0)?.into(),
                    requester_public_key: row.get(1)?,
                    verifier_public_key: row.get(2)?,
                    verification_hash: row.get(3)?,
                    hash_signature: row.get(4)?,
                    status: RequestStatus::from(row.get::<_, String>(5)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(requests)
    }

    /// Number of stored requests across all verifiers.
    pub fn request_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM verification_requests", [], |row| {
            row.get(0)
        })?;
        Ok(count as u64)
    }

    /// Status of one stored request, if present.
    pub fn request_status(&self, request_id: &str) -> Result<Option<RequestStatus>> {
        let conn = self.conn.lock();
        let status = conn
            .query_row(
                "SELECT status FROM verification_requests WHERE request_id = ?1",
                params![request_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(status.map(RequestStatus::from))
    }
}

impl AuctionStore for SqliteStore {
    fn persist(&self, snapshot: &AuctionSnapshot) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM verification_requests", [])?;
        tx.execute("DELETE FROM verifiers", [])?;
        tx.execute("DELETE FROM blocks", [])?;

        {
            let mut insert_block = tx.prepare(
                "INSERT INTO blocks (position, block_id, price, base_reward_rate, float_reward_rate,
                    min_reward, max_reward, creation_time, deadline, growth_speed, verified)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for (position, block) in snapshot.blocks.iter().enumerate() {
                insert_block.execute(params![
                    position as i64,
                    block.block_id as i64,
                    block.price,
                    block.base_reward_rate,
                    block.float_reward_rate,
                    block.min_reward,
                    block.max_reward,
                    block.creation_time,
                    block.deadline,
                    block.growth_speed,
                    block.verified,
                ])?;
            }

            let mut insert_verifier = tx.prepare(
                "INSERT INTO verifiers (position, verifier_id, session_id, credential, bid_price, total_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            let mut insert_request = tx.prepare(
                "INSERT INTO verification_requests (verifier_id, position, request_id, requester_public_key,
                    verifier_public_key, verification_hash, hash_signature, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (position, verifier) in snapshot.verifiers.iter().enumerate() {
                let verifier_id = verifier.verifier_id as i64;
                insert_verifier.execute(params![
                    position as i64,
                    verifier_id,
                    verifier.session_id,
                    verifier.credential.as_ref().map(|c| c.as_bytes()),
                    verifier.bid_price,
                    verifier.total_score,
                ])?;
                for (slot, request) in verifier.requests.iter().enumerate() {
                    insert_request.execute(params![
                        verifier_id,
                        slot as i64,
                        request.request_id.as_str(),
                        request.requester_public_key,
                        request.verifier_public_key,
                        request.verification_hash,
                        request.hash_signature,
                        request.status.as_str(),
                    ])?;
                }
            }
        }

        tx.commit()?;
        debug!(
            "Persisted {} blocks and {} verifiers",
            snapshot.blocks.len(),
            snapshot.verifiers.len()
        );
        Ok(())
    }

    fn load(&self) -> Result<AuctionSnapshot> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT block_id, price, base_reward_rate, float_reward_rate, min_reward, max_reward,
                    creation_time, deadline, growth_speed, verified
             FROM blocks ORDER BY position",
        )?;
        let blocks = stmt
            .query_map([], |row| {
                Ok(DataBlock {
                    block_id: row.get::<_, i64>(0)? as u64,
                    price: row.get(1)?,
                    base_reward_rate: row.get(2)?,
                    float_reward_rate: row.get(3)?,
                    min_reward: row.get(4)?,
                    max_reward: row.get(5)?,
                    creation_time: row.get(6)?,
                    deadline: row.get(7)?,
                    growth_speed: row.get(8)?,
                    verified: row.get(9)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT verifier_id, session_id, credential, bid_price, total_score
             FROM verifiers ORDER BY position",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<Vec<u8>>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, f64>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut verifiers = Vec::with_capacity(rows.len());
        for (verifier_id, session_id, credential, bid_price, total_score) in rows {
            verifiers.push(Verifier {
                verifier_id: verifier_id as u64,
                session_id,
                credential: credential.map(Credential::new),
                bid_price,
                total_score,
                requests: Self::load_requests(&conn, verifier_id)?,
            });
        }

        debug!(
            "Loaded {} blocks and {} verifiers",
            blocks.len(),
            verifiers.len()
        );
        Ok(AuctionSnapshot { blocks, verifiers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::tests::params;
    use crate::router::RequestRouter;
    use crate::verifier::VerifierSet;

    const START: i64 = 1_700_000_000;

    fn sample_snapshot() -> AuctionSnapshot {
        let mut first = DataBlock::new(params(1, START + 100), 1.0, START).unwrap();
        first.verified = true;
        let second = DataBlock::new(params(2, START + 200), 1.0, START).unwrap();

        let mut set = VerifierSet::new();
        set.insert_bidder(1, 2.5).unwrap();
        set.upsert_credential(Credential::new(vec![0xaa, 0xbb]));
        let mut verifiers = set.snapshot();
        verifiers[0].total_score = 4.25;
        verifiers[1].requests.push(RequestRouter::create_request(
            &[0x01],
            &[0xaa, 0xbb],
            &[0x10, 0x20],
            &[0x99],
        ));
        let mut second_request = RequestRouter::create_request(&[0x02], &[0xaa, 0xbb], &[0x30], &[]);
        second_request.status = RequestStatus::Other("escalated".to_string());
        verifiers[1].requests.push(second_request);

        AuctionSnapshot {
            blocks: vec![first, second],
            verifiers,
        }
    }

    #[test]
    fn test_empty_store_loads_empty_snapshot() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_persist_and_load() {
        let store = SqliteStore::in_memory().unwrap();
        let snapshot = sample_snapshot();
        store.persist(&snapshot).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(store.request_count().unwrap(), 2);
    }

    #[test]
    fn test_persist_replaces_previous_state() {
        let store = SqliteStore::in_memory().unwrap();
        store.persist(&sample_snapshot()).unwrap();

        let mut smaller = sample_snapshot();
        smaller.blocks.truncate(1);
        smaller.verifiers[1].requests.clear();
        store.persist(&smaller).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.blocks.len(), 1);
        assert!(loaded.verifiers[1].requests.is_empty());
        assert_eq!(store.request_count().unwrap(), 0);
    }

    #[test]
    fn test_failed_persist_keeps_previous_state() {
        let store = SqliteStore::in_memory().unwrap();
        let snapshot = sample_snapshot();
        store.persist(&snapshot).unwrap();

        // Duplicate block ids violate the UNIQUE constraint mid-transaction.
        let mut broken = sample_snapshot();
        broken.blocks[1].block_id = broken.blocks[0].block_id;
        assert!(store.persist(&broken).is_err());

        assert_eq!(store.load().unwrap(), snapshot);
    }

    #[test]
    fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auction.db");
        let snapshot = sample_snapshot();
        let request_id = snapshot.verifiers[1].requests[0].request_id.clone();

        SqliteStore::new(&path).unwrap().persist(&snapshot).unwrap();

        let reopened = SqliteStore::new(&path).unwrap();
        assert_eq!(reopened.load().unwrap(), snapshot);
        assert_eq!(
            reopened.request_status(request_id.as_str()).unwrap(),
            Some(RequestStatus::Pending)
        );
        assert_eq!(reopened.request_status("missing").unwrap(), None);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.load().unwrap().is_empty());
        store.persist(&sample_snapshot()).unwrap();
        assert_eq!(store.load().unwrap().blocks.len(), 2);
    }
}
