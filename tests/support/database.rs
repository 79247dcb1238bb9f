use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool};
use testcontainers::{GenericImage, ImageExt, core::WaitFor};
use testcontainers_modules::testcontainers::{
    ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
};
use thiserror::Error;
use uuid::Uuid;
use vault_migrator::models::VaultRecord;
use vault_migrator::StoreError;
use vault_migrator::store::run_schema_migrations;

#[derive(Debug, Error)]
pub enum TestDatabaseError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("schema error: {0}")]
    Schema(#[from] StoreError),
    #[error("container error: {0}")]
    Container(#[from] TestcontainersError),
}

/// Disposable PostgreSQL database with the vault schema applied.
pub struct TestDatabase {
    pool: Option<PgPool>,
    container: Option<ContainerAsync<GenericImage>>,
}

impl TestDatabase {
    pub async fn new() -> Result<Self, TestDatabaseError> {
        let container = GenericImage::new("postgres", "16-alpine")
            .with_wait_for(WaitFor::message_on_stderr(
                "database system is ready to accept connections",
            ))
            .with_env_var("POSTGRES_DB", "postgres")
            .with_env_var("POSTGRES_USER", "postgres")
            .with_env_var("POSTGRES_PASSWORD", "postgres")
            .start()
            .await?;

        let host = container.get_host().await?.to_string();
        let port = container.get_host_port_ipv4(5432).await?;
        let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

        let base_options: PgConnectOptions = admin_url.parse()?;
        let base_options = base_options.log_statements(log::LevelFilter::Off);

        let admin_pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(base_options.clone())
            .await?;

        let database_name = format!("vault_{}", Uuid::new_v4().simple());
        sqlx::query(&format!("CREATE DATABASE \"{}\"", database_name))
            .execute(&admin_pool)
            .await?;
        admin_pool.close().await;

        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect_with(base_options.database(&database_name))
            .await?;

        run_schema_migrations(&pool).await?;

        Ok(Self {
            pool: Some(pool),
            container: Some(container),
        })
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool
            .as_ref()
            .expect("test database pool is available")
            .clone()
    }

    pub async fn insert_states(&self, records: &[VaultRecord]) -> Result<(), sqlx::Error> {
        let pool = self.pool_clone();
        for record in records {
            sqlx::query(
                r#"INSERT INTO vault_states (transaction_id, output_index, contract_state_class_name,
                                             state_status, relevancy_status, recorded_timestamp,
                                             contract_state)
                   VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
            )
            .bind(&record.state_ref.txhash)
            .bind(record.state_ref.index)
            .bind(&record.contract_state_class_name)
            .bind(record.state_status.code())
            .bind(record.relevancy_status.code())
            .bind(record.recorded_timestamp)
            .bind(&record.contract_state)
            .execute(&pool)
            .await?;
        }
        Ok(())
    }

    pub async fn undone_count(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM vault_states vs
               WHERE NOT EXISTS (
                   SELECT 1 FROM state_party sp
                   WHERE sp.transaction_id = vs.transaction_id
                     AND sp.output_index = vs.output_index
               )"#,
        )
        .fetch_one(&self.pool_clone())
        .await
    }

    pub async fn close(mut self) {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
        if let Some(container) = self.container.take() {
            drop(container);
        }
    }
}
