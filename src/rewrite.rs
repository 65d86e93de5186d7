//! History rewrite (spec §4.12).
//!
//! `rewrite` replays a workspace's snapshot chain through a list of
//! per-snapshot actions and produces a **new** chain with new snapshot
//! IDs. The old chain is never touched, so a crash between minting the
//! new records and repointing the workspace at them merely leaves orphan
//! snapshots for GC — the workspace itself is always usable.

use tracing::info;

use crate::error::FastestError;
use crate::ids::SnapshotId;
use crate::snapshot::Snapshot;
use crate::workspace::Workspace;

/// One action applied to one snapshot in the chain being rewritten, in
/// oldest-first order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RewriteAction {
    /// Carry this snapshot into the new chain unchanged (besides its ID).
    Keep(SnapshotId),
    /// Omit this snapshot entirely from the new chain.
    Drop(SnapshotId),
    /// Fold this snapshot's manifest into the previous kept snapshot: the
    /// previous snapshot's manifest is replaced by this one's, and this
    /// one is not separately recorded.
    SquashWithPrevious(SnapshotId),
    /// Carry this snapshot into the new chain with a replacement message.
    EditMessage(SnapshotId, String),
}

impl RewriteAction {
    fn snapshot_id(&self) -> &SnapshotId {
        match self {
            Self::Keep(id) | Self::Drop(id) | Self::SquashWithPrevious(id) => id,
            Self::EditMessage(id, _) => id,
        }
    }
}

/// The result of a rewrite: the new chain's snapshots, oldest first, and
/// its head (the last one, the new `current_snapshot_id`).
#[derive(Clone, Debug)]
pub struct RewriteOutcome {
    pub new_chain: Vec<Snapshot>,
    pub head: Option<SnapshotId>,
}

/// Replay `actions` (oldest-first, one entry per snapshot currently in the
/// workspace's `fork_snapshot_id..=current_snapshot_id` chain) into a new
/// chain, then atomically repoint the workspace at its head.
///
/// # Errors
/// Returns an error if any source snapshot/manifest cannot be loaded, or
/// on any I/O failure minting or persisting the new chain. A failure
/// after the new records are written but before the workspace is
/// repointed leaves orphan snapshots only — it does not corrupt the
/// workspace.
pub fn rewrite(
    workspace: &mut Workspace<'_>,
    actions: Vec<RewriteAction>,
) -> Result<RewriteOutcome, FastestError> {
    let project = workspace.project_for_merge();

    let mut new_chain: Vec<Snapshot> = Vec::new();

    for action in actions {
        let source = project.snapshots().get(action.snapshot_id())?;
        match action {
            RewriteAction::Drop(_) => {
                info!(snapshot = %source.id, "rewrite: dropping snapshot");
            }
            RewriteAction::SquashWithPrevious(_) => {
                let Some(previous) = new_chain.last_mut() else {
                    return Err(FastestError::InvalidRewrite {
                        detail: format!(
                            "squash-with-previous on snapshot '{}' has no prior kept snapshot in the new chain to squash into",
                            source.id
                        ),
                    });
                };
                let manifest = project.load_manifest(&source.manifest_hash)?;
                let squashed_hash = project.store_manifest(&manifest)?;
                info!(old = %source.id, into = %previous.id, "rewrite: squashing into previous");
                previous.manifest_hash = squashed_hash;
                project.snapshots().write(previous)?;
            }
            RewriteAction::Keep(_) | RewriteAction::EditMessage(_, _) => {
                let message = match &action {
                    RewriteAction::EditMessage(_, msg) => msg.clone(),
                    _ => source.message.clone(),
                };
                let parent_ids = new_chain.last().map(|s: &Snapshot| vec![s.id.clone()]).unwrap_or_default();
                let new_snapshot = project.snapshots().create(
                    source.manifest_hash.clone(),
                    parent_ids,
                    message,
                    source.author.clone(),
                )?;
                info!(old = %source.id, new = %new_snapshot.id, "rewrite: carried snapshot into new chain");
                new_chain.push(new_snapshot);
            }
        }
    }

    let head = new_chain.last().map(|s| s.id.clone());
    workspace.repoint_after_rewrite(head.clone())?;

    Ok(RewriteOutcome { new_chain, head })
}
