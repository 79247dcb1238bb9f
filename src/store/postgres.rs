//! PostgreSQL vault store.
//!
//! The engine runs its page processing on a rayon pool, so every query here is a
//! blocking call that drives the `sqlx` future on the runtime behind `handle`.
//! Callers must not invoke the store from inside an async task; run the driver
//! on a plain thread or under `tokio::task::spawn_blocking`.

use super::{Store, Transaction};
use crate::error::{StoreError, StoreResult};
use crate::models::{PartyLink, RecordFilter, Relevancy, StateRef, StateStatus, VaultRecord};
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres};
use tokio::runtime::Handle;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

type VaultRow = (String, i32, String, i16, i16, DateTime<Utc>, Vec<u8>);

/// Apply the `vault_states` / `state_party` schema.
///
/// Idempotent: migrations that already ran are skipped.
pub async fn run_schema_migrations(pool: &PgPool) -> StoreResult<()> {
    log::info!("checking vault schema migration state");
    MIGRATOR.run(pool).await?;
    log::info!("vault schema up to date");
    Ok(())
}

fn filter_clause(filter: RecordFilter) -> &'static str {
    match filter {
        RecordFilter::Undone => {
            r#"NOT EXISTS (
                   SELECT 1 FROM state_party sp
                   WHERE sp.transaction_id = vs.transaction_id
                     AND sp.output_index = vs.output_index
               )"#
        }
        RecordFilter::All => "TRUE",
    }
}

fn record_from_row(row: VaultRow) -> StoreResult<VaultRecord> {
    let (txhash, index, class_name, status, relevancy, recorded_timestamp, contract_state) = row;
    let state_ref = StateRef::new(txhash, index);

    let state_status = StateStatus::from_code(status).ok_or_else(|| StoreError::CorruptRow {
        state_ref: state_ref.clone(),
        detail: format!("unknown state_status {}", status),
    })?;
    let relevancy_status =
        Relevancy::from_code(relevancy).ok_or_else(|| StoreError::CorruptRow {
            state_ref: state_ref.clone(),
            detail: format!("unknown relevancy_status {}", relevancy),
        })?;

    Ok(VaultRecord {
        state_ref,
        contract_state_class_name: class_name,
        state_status,
        relevancy_status,
        recorded_timestamp,
        contract_state,
    })
}

/// Store over a shared `PgPool`. Each worker task opens its own transaction from
/// the pool, so size the pool for the worker count plus the page cursor.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    handle: Handle,
}

impl PgStore {
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self { pool, handle }
    }

    pub async fn connect_pool(
        database_url: &str,
        max_connections: u32,
    ) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Store for PgStore {
    type Tx = PgTransaction;

    fn begin(&self) -> StoreResult<PgTransaction> {
        let inner = self.handle.block_on(self.pool.begin())?;
        Ok(PgTransaction {
            inner: Some(inner),
            handle: self.handle.clone(),
        })
    }
}

/// A pooled PostgreSQL transaction. Dropping it without a commit lets `sqlx`
/// roll it back when the connection returns to the pool.
pub struct PgTransaction {
    inner: Option<sqlx::Transaction<'static, Postgres>>,
    handle: Handle,
}

const RECORD_SAVEPOINT: &str = "vault_record";

impl PgTransaction {
    fn parts(&mut self) -> StoreResult<(&Handle, &mut sqlx::Transaction<'static, Postgres>)> {
        let tx = self.inner.as_mut().ok_or(StoreError::Closed)?;
        Ok((&self.handle, tx))
    }

    fn execute(&mut self, sql: &str) -> StoreResult<()> {
        let (handle, tx) = self.parts()?;
        handle.block_on(sqlx::query(sql).execute(&mut **tx))?;
        Ok(())
    }
}

impl Transaction for PgTransaction {
    fn count_matching(&mut self, filter: RecordFilter) -> StoreResult<u64> {
        let (handle, tx) = self.parts()?;
        let sql = format!(
            "SELECT COUNT(*) FROM vault_states vs WHERE {}",
            filter_clause(filter)
        );
        let count = handle.block_on(sqlx::query_scalar::<_, i64>(&sql).fetch_one(&mut **tx))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn query_page(
        &mut self,
        filter: RecordFilter,
        offset: u64,
        limit: usize,
    ) -> StoreResult<Vec<VaultRecord>> {
        let (handle, tx) = self.parts()?;
        let sql = format!(
            r#"SELECT vs.transaction_id, vs.output_index, vs.contract_state_class_name,
                      vs.state_status, vs.relevancy_status, vs.recorded_timestamp,
                      vs.contract_state
               FROM vault_states vs
               WHERE {}
               ORDER BY vs.transaction_id, vs.output_index
               OFFSET $1
               LIMIT $2"#,
            filter_clause(filter)
        );

        let rows: Vec<VaultRow> = handle.block_on(
            sqlx::query_as::<_, VaultRow>(&sql)
                .bind(i64::try_from(offset).unwrap_or(i64::MAX))
                .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                .fetch_all(&mut **tx),
        )?;

        log::trace!("page query returned {} vault states", rows.len());
        rows.into_iter().map(record_from_row).collect()
    }

    fn is_done(&mut self, state_ref: &StateRef) -> StoreResult<bool> {
        let (handle, tx) = self.parts()?;
        let done = handle.block_on(
            sqlx::query_scalar::<_, bool>(
                r#"SELECT EXISTS (
                       SELECT 1 FROM state_party
                       WHERE transaction_id = $1 AND output_index = $2
                   )"#,
            )
            .bind(&state_ref.txhash)
            .bind(state_ref.index)
            .fetch_one(&mut **tx),
        )?;
        Ok(done)
    }

    fn mark_done(&mut self, link: &PartyLink) -> StoreResult<()> {
        let (handle, tx) = self.parts()?;
        handle.block_on(
            sqlx::query(
                r#"INSERT INTO state_party (transaction_id, output_index, public_key_hash, x500_name)
                   VALUES ($1, $2, $3, $4)
                   ON CONFLICT (transaction_id, output_index, public_key_hash) DO NOTHING"#,
            )
            .bind(&link.state_ref.txhash)
            .bind(link.state_ref.index)
            .bind(&link.public_key_hash)
            .bind(link.x500_name.as_deref())
            .execute(&mut **tx),
        )?;
        Ok(())
    }

    fn set_relevancy(&mut self, state_ref: &StateRef, relevancy: Relevancy) -> StoreResult<()> {
        let (handle, tx) = self.parts()?;
        handle.block_on(
            sqlx::query(
                r#"UPDATE vault_states
                   SET relevancy_status = $1
                   WHERE transaction_id = $2 AND output_index = $3"#,
            )
            .bind(relevancy.code())
            .bind(&state_ref.txhash)
            .bind(state_ref.index)
            .execute(&mut **tx),
        )?;
        Ok(())
    }

    fn savepoint(&mut self) -> StoreResult<()> {
        self.execute(&format!("SAVEPOINT {}", RECORD_SAVEPOINT))
    }

    fn release_savepoint(&mut self) -> StoreResult<()> {
        self.execute(&format!("RELEASE SAVEPOINT {}", RECORD_SAVEPOINT))
    }

    fn rollback_to_savepoint(&mut self) -> StoreResult<()> {
        // ROLLBACK TO keeps the savepoint alive; release it so savepoints do not
        // pile up over a chunk.
        self.execute(&format!("ROLLBACK TO SAVEPOINT {}", RECORD_SAVEPOINT))?;
        self.release_savepoint()
    }

    /// `sqlx::Transaction::commit` consumes the transaction. When the commit
    /// fails, dropping it inside `block_on` queues the rollback before the
    /// connection returns to the pool, so a later `rollback` finds nothing to do.
    fn commit(&mut self) -> StoreResult<()> {
        let tx = self.inner.take().ok_or(StoreError::Closed)?;
        self.handle
            .block_on(tx.commit())
            .map_err(|e| StoreError::CommitFailed(e.to_string()))
    }

    fn rollback(&mut self) -> StoreResult<()> {
        match self.inner.take() {
            Some(tx) => Ok(self.handle.block_on(tx.rollback())?),
            None => Ok(()),
        }
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        // Returning the connection to the pool spawns onto the runtime.
        if let Some(tx) = self.inner.take() {
            let _guard = self.handle.enter();
            drop(tx);
        }
    }
}
