mod config;
mod net;
mod orchestrator;
mod push;
mod queue;
mod store;
mod strategy;
mod sync;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use net::HttpFetcher;
use orchestrator::Orchestrator;
use push::ClickOutcome;
use store::CacheDb;

#[derive(Parser, Debug)]
#[command(name = "reelcache")]
#[command(about = "Offline-first cache and sync companion for movie streaming web apps")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/reelcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch the shell manifest into the static store
  Install,
  /// Promote the installed version and collect stores from old versions
  Activate,
  /// Serve one URL through the cache strategies
  Fetch {
    /// Path on the origin, or an absolute URL
    target: String,
    /// HTTP method; anything but GET bypasses the cache
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Write the response body to this file ("-" for stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Manage the pending-change queue
  Queue {
    #[command(subcommand)]
    command: QueueCommand,
  },
  /// Replay pending changes against the write endpoint
  Sync {
    /// Tag of the sync event (defaults to the configured tag)
    #[arg(long)]
    tag: Option<String>,
    /// Keep draining until interrupted
    #[arg(long)]
    watch: bool,
  },
  /// Build the notification for a push payload
  Push {
    /// Payload text (defaults to the standard body when omitted)
    payload: Option<String>,
  },
  /// Resolve a notification action click
  NotifyClick {
    /// Action identifier (explore, close)
    action: String,
  },
  /// Show lifecycle phase, store contents and queue depth
  Status,
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
  /// Park a change for the next sync
  Add {
    /// HTTP method (POST, PUT, PATCH, DELETE)
    method: String,
    /// JSON payload
    data: String,
  },
  /// List queued changes, oldest first
  List {
    /// Print raw JSON records
    #[arg(long)]
    json: bool,
  },
}

/// Initialize the tracing subscriber for logging.
///
/// Diagnostics go to stderr so command output stays clean on stdout. Use
/// RUST_LOG to control the level. Watch mode logs through a non-blocking
/// writer; the returned guard must stay alive until exit.
fn init_tracing(watch: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
  let default = if watch { "info" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  if watch {
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());
    tracing_subscriber::registry()
      .with(fmt::layer().with_writer(writer))
      .with(filter)
      .init();
    Some(guard)
  } else {
    tracing_subscriber::registry()
      .with(fmt::layer().with_writer(io::stderr))
      .with(filter)
      .init();
    None
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let watching = matches!(args.command, Command::Sync { watch: true, .. });
  let _guard = init_tracing(watching);

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let db = match config.db_path {
    Some(ref path) => CacheDb::open_at(path)?,
    None => CacheDb::open()?,
  };
  let db = Arc::new(db);

  let fetcher = HttpFetcher::new(config.origin.clone(), Config::api_token())?;
  let orchestrator = Orchestrator::new(config.clone(), db, fetcher);

  match args.command {
    Command::Install => {
      let report = orchestrator.install().await?;
      println!("Installed {} ({} shell assets cached)", report.version, report.assets);
    }

    Command::Activate => {
      let report = orchestrator.activate()?;
      println!("Activated {}", report.version);
      for store in &report.dropped {
        println!("  dropped {}", store);
      }
    }

    Command::Fetch {
      target,
      method,
      output,
    } => {
      let url = config.resolve(&target)?;
      let request = net::FetchRequest {
        method: method.to_uppercase(),
        url,
        body: None,
      };
      let served = orchestrator.handle_fetch(request).await?;
      orchestrator.settle_writes().await;

      let summary = format!(
        "{} {} ({} bytes, from {})",
        served.status,
        target,
        served.body.len(),
        served.from
      );
      match output {
        Some(path) if path.as_os_str() == "-" => {
          io::Write::write_all(&mut io::stdout(), &served.body)
            .map_err(|e| eyre!("Failed to write body to stdout: {}", e))?;
          eprintln!("{}", summary);
        }
        Some(path) => {
          std::fs::write(&path, &served.body)
            .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
          println!("{} -> {}", summary, path.display());
        }
        None => println!("{}", summary),
      }
    }

    Command::Queue { command } => match command {
      QueueCommand::Add { method, data } => {
        let data: serde_json::Value =
          serde_json::from_str(&data).map_err(|e| eyre!("Payload is not valid JSON: {}", e))?;
        let change = orchestrator.queue().push(&method, &data)?;
        println!("Queued change {} ({})", change.id, change.method);
      }
      QueueCommand::List { json } => {
        let entries = orchestrator.queue().entries()?;
        if json {
          let rendered = serde_json::to_string_pretty(&entries)
            .map_err(|e| eyre!("Failed to render queue: {}", e))?;
          println!("{}", rendered);
        } else if entries.is_empty() {
          println!("No pending changes");
        } else {
          for change in &entries {
            println!(
              "{:>4}  {:<6}  {}  queued {}",
              change.id,
              change.method,
              change.data,
              change.queued_at.format("%Y-%m-%d %H:%M:%S")
            );
          }
        }
      }
    },

    Command::Sync { tag, watch } => {
      let mut sync_config = config.sync.clone();
      if let Some(tag) = tag {
        sync_config.tag = tag;
      }

      if watch {
        sync::watch(&orchestrator, &sync_config).await?;
      } else {
        let report = orchestrator.handle_sync(&sync_config.tag).await?;
        if report.recognized {
          println!(
            "Replayed {} changes, {} failed, {} still pending",
            report.replayed, report.failed, report.remaining
          );
        } else {
          println!(
            "Tag {} is not the sync tag; nothing drained ({} pending)",
            sync_config.tag, report.remaining
          );
        }
      }
    }

    Command::Push { payload } => {
      let notification = orchestrator.handle_push(payload.as_deref());
      let rendered = serde_json::to_string_pretty(&notification)
        .map_err(|e| eyre!("Failed to render notification: {}", e))?;
      println!("{}", rendered);
    }

    Command::NotifyClick { action } => match orchestrator.handle_notification_click(&action) {
      ClickOutcome::OpenApp(url) => println!("Opening {}", url),
      ClickOutcome::Dismiss => println!("Notification dismissed"),
    },

    Command::Status => {
      let status = orchestrator.status()?;
      println!("Phase: {}", status.phase);
      if let Some(version) = &status.installed_version {
        println!("Installed version: {}", version);
      }
      if let Some(version) = &status.active_version {
        println!("Active version: {}", version);
      }
      if status.stores.is_empty() {
        println!("Stores: none");
      } else {
        println!("Stores:");
        for store in &status.stores {
          match &store.newest {
            Some(newest) => println!(
              "  {:<20} {:>5} entries  newest {}",
              store.name,
              store.entries,
              newest.format("%Y-%m-%d %H:%M:%S")
            ),
            None => println!("  {:<20} {:>5} entries", store.name, store.entries),
          }
        }
      }
      println!("Pending changes: {}", status.pending_changes);
    }
  }

  Ok(())
}
