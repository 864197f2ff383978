use clap::{Parser, Subcommand};
use contentsync::{
    Action, ActionQueue, ChangeEvent, Config, ContentKind, ContentStore, Dispatcher, EntityQuery,
    LocalId, OfflineClient, RecordStore, Site, SiteId, SqliteRecordStore, UploadState,
};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect and repair a local content sync database", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarize stored content and upload states
    Status,
    /// List local copies for a site
    List {
        #[arg(long)]
        site: i64,
        #[arg(long)]
        kind: Option<ContentKind>,
    },
    /// List upload records, optionally in one state
    Uploads {
        #[arg(long)]
        state: Option<UploadState>,
    },
    /// Move failed or cancelled uploads back to pending
    Retry {
        #[arg(required = true, value_parser = clap::value_parser!(i64).range(1..))]
        ids: Vec<i64>,
    },
    /// Forget every local copy belonging to a site
    Purge {
        #[arg(long)]
        site: i64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = Config::from_file(&args.config)?;
    if let Some(parent) = config.storage.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    info!("Opening database at: {:?}", config.storage.db_path);
    let records = Arc::new(SqliteRecordStore::open(
        &config.storage.db_path,
        &config.storage,
    )?);

    match args.command {
        Command::Status => {
            let entities = records.count(&EntityQuery::all())?;
            let drafts = records.count(&EntityQuery::all().local_only(true))?;
            let modified = records.count(&EntityQuery::all().locally_modified(true))?;
            println!("entities: {} ({} local drafts, {} modified)", entities, drafts, modified);
            for state in UploadState::ALL {
                let n = records.find_uploads(Some(state))?.len();
                if n > 0 {
                    println!("uploads {:<10} {}", state, n);
                }
            }
        }
        Command::List { site, kind } => {
            let mut query = EntityQuery::site(SiteId(site));
            if let Some(kind) = kind {
                query = query.kind(kind);
            }
            for entity in records.find(&query)? {
                let flag = if entity.is_local_only {
                    "draft"
                } else if entity.is_locally_modified {
                    "modified"
                } else {
                    "synced"
                };
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    entity.local_id, entity.remote_id, entity.kind, flag, entity.fields.title
                );
            }
        }
        Command::Uploads { state } => {
            for record in records.find_uploads(state)? {
                let error = record
                    .last_error
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                println!(
                    "{}\t{}\t{}\t{:.0}%\tattempts={}\t{}",
                    record.local_id,
                    record.operation.as_str(),
                    record.state,
                    record.progress * 100.0,
                    record.attempts,
                    error
                );
            }
        }
        Command::Retry { ids } => {
            let action = Action::RetryUploads {
                local_ids: ids.into_iter().map(LocalId).collect(),
            };
            run_through_dispatcher(&config, records, action).await?;
        }
        Command::Purge { site } => {
            // Purging never touches the network, so the url is irrelevant
            let action = Action::RemoveSiteContent {
                site: Site::new(SiteId(site), ""),
            };
            run_through_dispatcher(&config, records, action).await?;
        }
    }

    Ok(())
}

/// Route one mutation through a dispatch worker so the content store stays
/// the only writer
async fn run_through_dispatcher(
    config: &Config,
    records: Arc<SqliteRecordStore>,
    action: Action,
) -> Result<(), Box<dyn std::error::Error>> {
    let dispatcher = Arc::new(Dispatcher::new());
    let (sender, queue) = ActionQueue::new(config.dispatch.queue_capacity);

    let store = Arc::new(ContentStore::new(
        records,
        Arc::new(OfflineClient),
        sender.clone(),
        &config.network,
    ));
    dispatcher.register(store);
    dispatcher.add_listener(Arc::new(|event: &ChangeEvent| match &event.error {
        Some(error) => warn!("{} failed: {}", event.cause, error),
        None => println!("{}: {} affected", event.cause, event.affected),
    }));

    let worker = queue.spawn(Arc::clone(&dispatcher));
    sender.send(action).await?;
    sender.shutdown().await?;
    let dispatched = worker.await?;
    info!("dispatched {} actions", dispatched);
    Ok(())
}
