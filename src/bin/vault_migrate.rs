use std::io::{self, Write};

use clap::Parser;

use vault_migrator::store::run_schema_migrations;
use vault_migrator::{MigrationConfig, MigrationDriver, PartyLinker, PgStore};

#[derive(Parser, Debug)]
#[command(
    name = "vault-migrate",
    about = "Link every unlinked vault state to its participants"
)]
struct Args {
    /// PostgreSQL connection string for the vault database.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Records per page fetch. Defaults to VAULT_MIGRATION_PAGE_SIZE or 1000.
    #[arg(long)]
    page_size: Option<usize>,

    /// Largest chunk processed in a single transaction.
    #[arg(long)]
    split_threshold: Option<usize>,

    /// Worker threads in the processing pool.
    #[arg(long)]
    workers: Option<usize>,

    /// Contract state class the payload decoder accepts. Repeatable.
    #[arg(long = "contract-class", required = true)]
    contract_classes: Vec<String>,

    /// Owning key held by this node; states it participates in become relevant.
    #[arg(long = "our-key")]
    our_keys: Vec<String>,

    /// Create or upgrade the vault schema before migrating.
    #[arg(long)]
    apply_schema: bool,

    /// Print the run report as JSON instead of text.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    vault_migrator::init_logger();

    let args = Args::parse();

    let mut config = MigrationConfig::from_env();
    if let Some(page_size) = args.page_size {
        config = config.with_page_size(page_size);
    }
    if let Some(split_threshold) = args.split_threshold {
        config = config.with_split_threshold(split_threshold);
    }
    if let Some(workers) = args.workers {
        config = config
            .with_worker_threads(workers)
            .with_max_connections(workers as u32 + 2);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("vault-migrate-io")
        .build()?;

    let pool = runtime.block_on(PgStore::connect_pool(
        &args.database_url,
        config.max_connections,
    ))?;

    if args.apply_schema {
        runtime.block_on(run_schema_migrations(&pool))?;
    }

    let store = PgStore::new(pool, runtime.handle().clone());
    let driver = MigrationDriver::new(store, config)?;
    let linker = PartyLinker::new(args.contract_classes, args.our_keys);

    let report = driver.run(&linker)?;

    let mut stdout = io::stdout();
    if args.json {
        writeln!(stdout, "{}", serde_json::to_string_pretty(&report)?)?;
    } else {
        writeln!(stdout, "{}", report)?;
    }

    runtime.block_on(driver.store().pool().close());
    Ok(())
}
