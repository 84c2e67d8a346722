//! Snapshot maintenance commands

use clap::Subcommand;
use conductor_snapshot::{JsonFileSnapshotStore, SnapshotManager};
use conductor_types::SnapshotId;
use std::sync::Arc;

/// Snapshot subcommands
#[derive(Subcommand)]
pub enum SnapshotCommands {
    /// List live snapshots, oldest first
    List,

    /// Delete one snapshot
    Delete {
        /// Snapshot ID
        id: String,
    },

    /// Delete every expired snapshot
    Prune,
}

pub async fn execute(command: SnapshotCommands, dir: &str) -> anyhow::Result<()> {
    let store = JsonFileSnapshotStore::open(dir).await?;
    let manager = SnapshotManager::new(Arc::new(store));

    match command {
        SnapshotCommands::List => {
            let snapshots = manager.list_snapshots().await?;
            if snapshots.is_empty() {
                println!("No snapshots in {}", dir);
            }
            for s in snapshots {
                println!(
                    "{}  {:<18} created {}  expires {}",
                    s.id,
                    s.label,
                    s.timestamp.to_rfc3339(),
                    s.expires_at.to_rfc3339()
                );
            }
            Ok(())
        }

        SnapshotCommands::Delete { id } => {
            if manager.delete_snapshot(&SnapshotId::new(&id)).await? {
                println!("Deleted snapshot {}", id);
                Ok(())
            } else {
                anyhow::bail!("snapshot not found: {}", id)
            }
        }

        SnapshotCommands::Prune => {
            let removed = manager.prune_expired().await?;
            println!("Pruned {} expired snapshot(s)", removed);
            Ok(())
        }
    }
}
