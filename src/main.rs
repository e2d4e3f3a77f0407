use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use anchorkeep::engine::mock::{MockMappingEngine, MockTracker};
use anchorkeep::map::{deserialize, validate};
use anchorkeep::storage::blob_name;
use anchorkeep::{
    engine_channel, util, AppStateStore, ArtifactKind, BlobStore, Config, Database, Engines,
    FinalizedMap, LocalizeOutcome, MapEdge, MapNode, MapSessionStore, MapSignature, MapSubgraph,
    MappingOutcome, ObjectLedger, Pose, Position, SessionContext, SessionManager, TrackingStatus,
};

#[derive(Parser)]
#[command(name = "anchorkeep", version, about = "Inspect and manage persisted spatial maps")]
struct Cli {
    /// Data directory (default ~/.anchorkeep)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the last saved map and whether it can be loaded
    Status,
    /// List every map recorded by a successful scan
    List,
    /// Print the placed objects recorded for a map
    Objects { signature: Option<String> },
    /// Delete the placed-object ledger of a map
    ClearObjects { signature: Option<String> },
    /// Decode a map artifact and report its contents
    Inspect { signature: Option<String> },
    /// Forget the last map signature and current map path
    Forget,
    /// Run a scan, place objects and localize against mock engines
    Simulate {
        /// Number of objects to place
        #[arg(long, default_value_t = 2)]
        objects: usize,
        /// Number of map nodes the mock engine reports
        #[arg(long, default_value_t = 4)]
        nodes: u64,
    },
}

#[derive(Serialize)]
struct StatusReport {
    last_signature: Option<String>,
    current_map_path: Option<PathBuf>,
    has_saved_map: bool,
    objects: usize,
}

#[derive(Serialize)]
struct InspectReport {
    signature: String,
    path: PathBuf,
    bytes: usize,
    nodes: usize,
    edges: usize,
    valid: bool,
}

#[derive(Serialize)]
struct ListEntry {
    signature: String,
    map_path: PathBuf,
    nodes: usize,
    edges: usize,
    created_at: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    util::init_data_dir(cli.data_dir.clone());

    // Initialize logging to file (~/.anchorkeep/logs/anchorkeep.log)
    fs::create_dir_all(util::logs_dir())?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(util::log_file_path())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(log_file)
        .with_ansi(false) // Disable ANSI colors in log file
        .init();

    let config = Config::load();
    let db = Database::open_default().context("Failed to open database")?;
    let store = BlobStore::open_default().context("Failed to open artifact store")?;

    match cli.command {
        Commands::Status => status(&db, &store, &config, cli.json),
        Commands::List => list(&db, cli.json),
        Commands::Objects { signature } => objects(&db, &store, &config, signature, cli.json),
        Commands::ClearObjects { signature } => clear_objects(&db, &store, &config, signature),
        Commands::Inspect { signature } => inspect(&db, &store, signature, cli.json),
        Commands::Forget => forget(&db),
        Commands::Simulate { objects, nodes } => simulate(config, &db, store, objects, nodes).await,
    }
}

fn restore_context(db: &Database) -> Result<SessionContext> {
    SessionContext::restore(&AppStateStore::new(db.connection()))
        .context("Failed to read session context")
}

/// Use the given signature, falling back to the last saved one
fn resolve_signature(db: &Database, arg: Option<String>) -> Result<MapSignature> {
    match arg {
        Some(raw) => Ok(MapSignature::parse(raw)?),
        None => restore_context(db)?
            .last_signature
            .ok_or_else(|| anyhow!("No map signature given and no saved map")),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn status(db: &Database, store: &BlobStore, config: &Config, json: bool) -> Result<()> {
    let context = restore_context(db)?;
    let has_saved_map = context
        .last_signature
        .as_ref()
        .is_some_and(|sig| store.exists(&blob_name(sig, ArtifactKind::Map)));
    let objects = match &context.last_signature {
        Some(sig) => {
            ObjectLedger::new(store.clone(), config.ledger.malformed_records)
                .load_all(sig)?
                .positions
                .len()
        }
        None => 0,
    };

    let report = StatusReport {
        last_signature: context.last_signature.map(|s| s.as_str().to_string()),
        current_map_path: context.current_map_path,
        has_saved_map,
        objects,
    };
    if json {
        return print_json(&report);
    }

    match &report.last_signature {
        Some(sig) => println!("Last map:     {}", sig),
        None => println!("Last map:     (none)"),
    }
    if let Some(path) = &report.current_map_path {
        println!("Map path:     {}", path.display());
    }
    println!(
        "Loadable:     {}",
        if report.has_saved_map { "yes" } else { "no" }
    );
    println!("Objects:      {}", report.objects);
    Ok(())
}

fn list(db: &Database, json: bool) -> Result<()> {
    let records = MapSessionStore::new(db.connection()).list()?;
    let entries: Vec<ListEntry> = records
        .into_iter()
        .map(|r| ListEntry {
            signature: r.signature.as_str().to_string(),
            map_path: r.map_path,
            nodes: r.node_count,
            edges: r.edge_count,
            created_at: r.created_at.to_rfc3339(),
        })
        .collect();

    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No maps recorded");
    }
    for entry in entries {
        println!(
            "{}  {} nodes  {} edges  {}",
            entry.signature, entry.nodes, entry.edges, entry.created_at
        );
    }
    Ok(())
}

fn objects(
    db: &Database,
    store: &BlobStore,
    config: &Config,
    signature: Option<String>,
    json: bool,
) -> Result<()> {
    let signature = resolve_signature(db, signature)?;
    let ledger = ObjectLedger::new(store.clone(), config.ledger.malformed_records);
    let load = ledger.load_all(&signature)?;

    if json {
        return print_json(&load.positions);
    }
    for position in &load.positions {
        println!("{}", position);
    }
    for rejected in &load.rejected {
        eprintln!("skipped: {}", rejected);
    }
    Ok(())
}

fn clear_objects(
    db: &Database,
    store: &BlobStore,
    config: &Config,
    signature: Option<String>,
) -> Result<()> {
    let signature = resolve_signature(db, signature)?;
    ObjectLedger::new(store.clone(), config.ledger.malformed_records).clear_all(&signature)?;
    println!("Cleared objects for {}", signature);
    Ok(())
}

fn inspect(db: &Database, store: &BlobStore, signature: Option<String>, json: bool) -> Result<()> {
    let signature = resolve_signature(db, signature)?;
    let name = blob_name(&signature, ArtifactKind::Map);
    let bytes = store
        .read_blob(&name)
        .with_context(|| format!("No map stored for {}", signature))?;
    let graph = deserialize(&bytes).with_context(|| format!("Map {} is corrupt", signature))?;

    let report = InspectReport {
        signature: signature.as_str().to_string(),
        path: store.path_of(&name),
        bytes: bytes.len(),
        nodes: graph.node_count(),
        edges: graph.edge_count(),
        valid: validate(&graph).is_ok(),
    };
    if json {
        return print_json(&report);
    }

    println!("Map:    {}", report.signature);
    println!("Path:   {}", report.path.display());
    println!("Size:   {} bytes", report.bytes);
    println!("Nodes:  {}", report.nodes);
    println!("Edges:  {}", report.edges);
    println!("Valid:  {}", if report.valid { "yes" } else { "no" });
    Ok(())
}

fn forget(db: &Database) -> Result<()> {
    SessionContext::forget(&AppStateStore::new(db.connection()))?;
    println!("Forgot last map");
    Ok(())
}

/// A chain of `nodes` nodes one meter apart, split across two subgraphs
fn synthetic_map(nodes: u64) -> FinalizedMap {
    let nodes = nodes.max(2);
    let split = nodes / 2;
    let node = |id: u64| MapNode::new(id, Pose::at(id as f32, 0.0, 0.0));
    let edges = |range: std::ops::Range<u64>| {
        range
            .map(|id| MapEdge::new(id, id + 1, 0.9))
            .collect::<Vec<_>>()
    };

    FinalizedMap::new(vec![
        MapSubgraph::new((0..=split).map(node).collect(), edges(0..split)),
        MapSubgraph::new((split..nodes).map(node).collect(), edges(split..nodes - 1)),
    ])
}

async fn simulate(
    config: Config,
    db: &Database,
    store: BlobStore,
    objects: usize,
    nodes: u64,
) -> Result<()> {
    let (tx, rx) = engine_channel();
    let mapper = MockMappingEngine::new(tx.clone()).finalize_on_stop(Some(synthetic_map(nodes)));
    let tracker = MockTracker::new(tx)
        .with_script(vec![TrackingStatus::Searching, TrackingStatus::Localized]);

    let mut manager = SessionManager::new(
        config,
        Engines {
            mapper: Arc::new(mapper),
            tracker: Arc::new(tracker),
            events: rx,
        },
        store,
        db,
    )?;
    manager.initialize().await?;

    let pending = manager.begin_scan().await?;
    manager.finish_scan().await?;
    manager.process_pending().await;
    let signature = match pending.await? {
        MappingOutcome::Succeeded { signature, map_path } => {
            println!("Mapped {} -> {}", signature, map_path.display());
            signature
        }
        MappingOutcome::Failed(reason) => bail!("Scan failed: {}", reason),
    };

    for i in 0..objects {
        let position = Position::new(i as f32, 0.0, i as f32 + 1.0);
        manager.place_object(position).await?;
        println!("Placed object at {}", position);
    }
    manager.exit().await;

    let pending = manager.begin_localize().await?;
    manager.process_pending().await;
    match pending.await? {
        LocalizeOutcome::Localized {
            restored, rejected, ..
        } => {
            println!(
                "Localized against {}; restored {} objects ({} rejected)",
                signature,
                restored.len(),
                rejected
            );
        }
        LocalizeOutcome::Failed(reason) => bail!("Localization failed: {}", reason),
    }
    manager.exit().await;
    Ok(())
}
