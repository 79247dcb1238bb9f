//! Vault state migration.
//!
//! Links every persisted vault state to its participants in `state_party`,
//! paging over the states that are not linked yet and fanning each page out over
//! a rayon worker pool. See [`migration`] for how the engine pages over a result
//! set that shrinks as it goes.

pub mod config;
pub mod error;
pub mod linker;
pub mod migration;
pub mod models;
pub mod store;

pub use config::MigrationConfig;
pub use error::{MigrationError, RecordError, StoreError};
pub use linker::PartyLinker;
pub use migration::{MigrationDriver, MigrationReport, Transform};
pub use store::{MemoryStore, PgStore, Store, Transaction};

use env_logger::Env;
use std::sync::Once;

static LOGGER: Once = Once::new();

/// Install the process-wide logger once. `RUST_LOG` overrides the default filter.
pub fn init_logger() {
    LOGGER.call_once(|| {
        let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info,sqlx=warn"))
            .try_init();
    });
}
