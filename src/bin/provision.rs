use clap::Parser;
use std::io;
use tracing::info;
use tracing_subscriber::EnvFilter;
use xschema::cli::{Command, CLI};
use xschema::db;
use xschema::memory::MemoryStore;
use xschema::provision::{Options, Provisioner};
use xschema::store::MongoStore;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // RUST_LOG, defaulting to warn; logs go to stderr so stdout stays readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = CLI::parse();
    let command = cli.command.clone().unwrap_or_default();
    let options = Options::from(&command);
    let stdout = io::stdout().lock();

    match command {
        Command::Provision { dry_run: true, .. } => {
            info!("dry run against an in-memory database");
            Provisioner::new(MemoryStore::default(), stdout, options)
                .run()
                .await?;
        }
        Command::Provision { .. } => {
            let store = MongoStore::new(db::conn(cli.db_config()).await?);
            Provisioner::new(store, stdout, options).run().await?;
        }
        Command::Indexes => {
            let store = MongoStore::new(db::conn(cli.db_config()).await?);
            Provisioner::new(store, stdout, options)
                .report_indexes()
                .await?;
        }
    }

    Ok(())
}
