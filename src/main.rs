//! # Workitem Archive CLI (`warc`)
//!
//! ## Usage
//!
//! ```bash
//! warc --config ./config/warc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `warc init` | Create the SQLite database and run schema migrations |
//! | `warc snapshot <file.xml>` | Snapshot a workitem document and archive it |
//! | `warc export` | Export new snapshots to the file transport |
//! | `warc import` | Import snapshot files from the file transport |
//! | `warc restore --from D --to D` | Restore a time window into the live system |
//! | `warc run` | Schedule export and resume restore until Ctrl-C |
//! | `warc status` | Print the sync cursors |
//! | `warc reset <group>` | Clear the export, import or restore cursor |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use workitem_archive::status::CursorGroup;
use workitem_archive::{config, logging, migrate, snapshot_cmd, status, sync};

/// Workitem Archive: snapshot archive with export, import and restore.
#[derive(Parser)]
#[command(
    name = "warc",
    about = "Workitem Archive: snapshot archive with checkpointed export, import and restore",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/warc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Snapshot a workitem document and add the snapshot to the archive.
    ///
    /// The document is stored in the live store with its file content
    /// replaced by placeholders.
    Snapshot {
        /// Path to the XML document.
        path: PathBuf,
    },

    /// Export snapshots modified since the last syncpoint.
    Export,

    /// Import snapshot files not yet in the archive. Ctrl-C cancels.
    Import,

    /// Restore archived snapshots created in a window into the live system.
    ///
    /// Only the latest snapshot of each workitem inside the window is
    /// restored, and only when the live system does not already hold it.
    Restore {
        /// First day of the window (YYYY-MM-DD, UTC).
        #[arg(long)]
        from: String,

        /// Last day of the window, inclusive (YYYY-MM-DD, UTC).
        #[arg(long)]
        to: String,

        /// Item filter `item=regex`; repeatable, all must match.
        /// The item `type` matches the workitem type.
        #[arg(long = "filter")]
        filters: Vec<String>,
    },

    /// Run as a daemon: periodic export plus any pending restore window.
    Run,

    /// Show the export, import and restore cursors.
    Status,

    /// Clear a cursor group.
    Reset {
        #[arg(value_enum)]
        group: CursorGroup,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Snapshot { path } => {
            snapshot_cmd::run_snapshot(&cfg, &path).await?;
        }
        Commands::Export => {
            sync::run_export(&cfg).await?;
        }
        Commands::Import => {
            sync::run_import(&cfg).await?;
        }
        Commands::Restore { from, to, filters } => {
            sync::run_restore(&cfg, &from, &to, &filters).await?;
        }
        Commands::Run => {
            sync::run_daemon(&cfg).await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
        Commands::Reset { group } => {
            status::run_reset(&cfg, group).await?;
        }
    }

    Ok(())
}
