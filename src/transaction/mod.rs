//! try/confirm/cancel protocol for configuration changes
//!
//! A `try_*` call edits the tree cheaply and reversibly so the new
//! configuration can be priced with [`ImpurityTrace::compute`]:
//! - trial insertions hang new leaves with a plain BST insertion and record
//!   where they were attached
//! - trial deletions only flag the node, which then acts as the identity
//!
//! Both flag the root-to-node path as modified. `cancel_*` undoes the edit
//! and clears the flags; the caches of flagged nodes were never written, so
//! nothing else needs restoring. `confirm_*` applies the edit with the
//! balanced operations and refreshes the cache.
//!
//! Inserts and deletes may be pending together (a shift move); they are then
//! resolved together by `confirm_shift`/`cancel_shift`. A replace excludes
//! every other move.

mod replace;

use crate::hamiltonian::AtomDiag;
use crate::operator::{OpDesc, TimePoint};
use crate::tree::{Direction, NodeId, TrialLink};
use crate::{ImpurityTrace, TraceError};
use std::fmt;
use tracing::debug;

/// Kind of configuration change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveKind {
    /// Operator insertion
    Insert,
    /// Operator removal
    Delete,
    /// Simultaneous insertion and removal
    Shift,
    /// Global operator substitution
    Replace,
}

impl fmt::Display for MoveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MoveKind::Insert => "insert",
            MoveKind::Delete => "delete",
            MoveKind::Shift => "shift",
            MoveKind::Replace => "replace",
        };
        f.write_str(name)
    }
}

impl<D: AtomDiag> ImpurityTrace<D> {
    // ===== Insertion =====

    /// Tentatively insert `op` at `tau`
    ///
    /// Several insertions may be tried before the move is resolved, up to the
    /// trial pool capacity.
    pub fn try_insert(&mut self, tau: TimePoint, op: OpDesc) -> Result<(), TraceError> {
        self.ensure_no_replace(MoveKind::Insert)?;
        let beta = self.config.beta;
        if !(tau.value() >= 0.0 && tau.value() < beta) {
            return Err(TraceError::TimeOutOfRange {
                tau: tau.value(),
                beta,
            });
        }
        if op.orbital >= self.config.n_orbitals {
            return Err(TraceError::UnknownOrbital {
                orbital: op.orbital,
                n_orbitals: self.config.n_orbitals,
            });
        }
        if self.tree.contains(tau) {
            return Err(TraceError::DuplicateKey(tau.value()));
        }

        let id = self
            .trial_nodes
            .take_next()
            .ok_or(TraceError::TrialPoolExhausted {
                capacity: self.trial_nodes.capacity(),
            })?;
        self.tree.node_mut(id).reset(tau, op);
        let link = self.attach_trial(id);
        self.trial_links.push(link);
        self.tree_size += 1;

        debug!(tau = %tau, op = %op, node = %id, "trial insertion");
        Ok(())
    }

    /// Drop every trial insertion
    pub fn cancel_insert(&mut self) -> Result<(), TraceError> {
        if self.trial_links.is_empty() {
            self.trial_nodes.reset();
            return Ok(());
        }
        let n = self.trial_links.len();
        self.detach_trial_nodes();
        self.trial_nodes.reset();
        self.tree.clear_modified();
        self.restore_pending_marks();
        self.tree_size = self.tree.len() - self.removed_nodes.len();

        debug!(cancelled = n, "trial insertions cancelled");
        self.maybe_check_integrity()
    }

    /// Make the trial insertions permanent
    pub fn confirm_insert(&mut self) -> Result<(), TraceError> {
        if !self.removed_nodes.is_empty() {
            return Err(TraceError::TransactionPending {
                requested: MoveKind::Insert,
                pending: MoveKind::Delete,
            });
        }
        if self.trial_links.is_empty() {
            return Ok(());
        }
        let n = self.commit_trial_nodes();
        self.update_cache();
        self.tree_size = self.tree.len();

        debug!(inserted = n, size = self.tree_size, "insertion confirmed");
        self.maybe_check_integrity()
    }

    /// Glue `id` into the tree as a leaf, flagging the path to it
    fn attach_trial(&mut self, id: NodeId) -> TrialLink {
        let key = self.tree.node(id).key;
        let mut parent = None;
        let mut current = self.tree.root();
        while let Some(c) = current {
            let node = self.tree.node_mut(c);
            node.modified = true;
            let side = if key < node.key {
                Direction::Left
            } else {
                Direction::Right
            };
            current = match side {
                Direction::Left => node.left,
                Direction::Right => node.right,
            };
            parent = Some((c, side));
        }

        match parent {
            None => self.tree.set_root(Some(id)),
            Some((p, Direction::Left)) => self.tree.node_mut(p).left = Some(id),
            Some((p, Direction::Right)) => self.tree.node_mut(p).right = Some(id),
        }
        TrialLink { node: id, parent }
    }

    /// Unhook every trial node, latest first
    ///
    /// Leaves the pool untouched; flags set by the attachment stay set.
    pub(crate) fn detach_trial_nodes(&mut self) {
        let links = std::mem::take(&mut self.trial_links);
        for link in links.iter().rev() {
            match link.parent {
                None => self.tree.set_root(None),
                Some((p, Direction::Left)) => self.tree.node_mut(p).left = None,
                Some((p, Direction::Right)) => self.tree.node_mut(p).right = None,
            }
        }
    }

    /// Move the trial nodes into the balanced tree; returns how many
    fn commit_trial_nodes(&mut self) -> usize {
        self.detach_trial_nodes();
        let ids = self.trial_nodes.hand_over(self.tree.arena_mut());
        for &id in &ids {
            self.tree.insert(id);
        }
        ids.len()
    }

    pub(crate) fn is_trial(&self, id: NodeId) -> bool {
        self.trial_links.iter().any(|link| link.node == id)
    }

    // ===== Deletion =====

    /// Flag the `n`-th (0-based, time order) operator with the given block
    /// index and dagger flag for deletion; returns its time
    ///
    /// Trial insertions are not counted.
    pub fn try_delete(
        &mut self,
        n: usize,
        block_index: usize,
        dagger: bool,
    ) -> Result<TimePoint, TraceError> {
        self.ensure_no_replace(MoveKind::Delete)?;
        let matches: Vec<NodeId> = self
            .tree
            .iter()
            .filter(|&id| {
                let op = self.tree.node(id).op;
                op.dagger == dagger && op.block_index == block_index && !self.is_trial(id)
            })
            .collect();
        let id = *matches.get(n).ok_or(TraceError::DeleteIndexOutOfRange {
            n,
            available: matches.len(),
        })?;

        let key = self.tree.node(id).key;
        if self.tree.node(id).delete_flag {
            return Err(TraceError::AlreadyFlagged(key.value()));
        }
        self.tree.node_mut(id).delete_flag = true;
        self.tree.mark_path_to(key);
        self.removed_nodes.push((id, key));
        self.tree_size -= 1;

        debug!(tau = %key, node = %id, "trial deletion");
        Ok(key)
    }

    /// Clear every pending deletion flag
    pub fn cancel_delete(&mut self) -> Result<(), TraceError> {
        if self.removed_nodes.is_empty() {
            return Ok(());
        }
        let n = self.removed_nodes.len();
        self.unflag_removed();
        self.tree.clear_modified();
        self.restore_pending_marks();
        self.tree_size = self.tree.len() + self.trial_links.len();

        debug!(cancelled = n, "trial deletions cancelled");
        self.maybe_check_integrity()
    }

    /// Delete the flagged operators for good
    pub fn confirm_delete(&mut self) -> Result<(), TraceError> {
        if !self.trial_links.is_empty() {
            return Err(TraceError::TransactionPending {
                requested: MoveKind::Delete,
                pending: MoveKind::Insert,
            });
        }
        if self.removed_nodes.is_empty() {
            return Ok(());
        }
        let n = self.commit_removals();
        self.update_cache();
        self.tree_size = self.tree.len();

        debug!(deleted = n, size = self.tree_size, "deletion confirmed");
        self.maybe_check_integrity()
    }

    fn unflag_removed(&mut self) {
        for (id, _) in std::mem::take(&mut self.removed_nodes) {
            self.tree.node_mut(id).delete_flag = false;
        }
    }

    /// Unlink the flagged nodes with the balanced deletion and return them
    /// to the arena; returns how many
    fn commit_removals(&mut self) -> usize {
        let removed = std::mem::take(&mut self.removed_nodes);
        for &(id, key) in &removed {
            if let Some(unlinked) = self.tree.remove(key) {
                debug_assert_eq!(unlinked, id, "node identity lost in deletion");
                self.tree.arena_mut().release(unlinked);
            }
        }
        removed.len()
    }

    // ===== Shift =====

    /// Drop pending insertions and deletions together
    pub fn cancel_shift(&mut self) -> Result<(), TraceError> {
        if self.trial_links.is_empty() && self.removed_nodes.is_empty() {
            self.trial_nodes.reset();
            return Ok(());
        }
        self.detach_trial_nodes();
        self.trial_nodes.reset();
        self.unflag_removed();
        self.tree.clear_modified();
        self.tree_size = self.tree.len();

        debug!("shift cancelled");
        self.maybe_check_integrity()
    }

    /// Apply pending insertions and deletions, refreshing the cache once
    pub fn confirm_shift(&mut self) -> Result<(), TraceError> {
        self.ensure_no_replace(MoveKind::Shift)?;
        let inserted = if self.trial_links.is_empty() {
            self.trial_nodes.reset();
            0
        } else {
            self.commit_trial_nodes()
        };
        let deleted = self.commit_removals();
        self.update_cache();
        self.tree_size = self.tree.len();

        debug!(inserted, deleted, size = self.tree_size, "shift confirmed");
        self.maybe_check_integrity()
    }

    // ===== Shared bookkeeping =====

    /// Flag again the paths of edits still pending after the flags were
    /// cleared for another category
    fn restore_pending_marks(&mut self) {
        let keys: Vec<TimePoint> = self
            .removed_nodes
            .iter()
            .map(|&(_, key)| key)
            .chain(self.trial_links.iter().map(|link| self.tree.node(link.node).key))
            .collect();
        for key in keys {
            self.tree.mark_path_to(key);
        }
    }

    fn ensure_no_replace(&self, requested: MoveKind) -> Result<(), TraceError> {
        if self.replace_pending {
            return Err(TraceError::TransactionPending {
                requested,
                pending: MoveKind::Replace,
            });
        }
        Ok(())
    }
}
