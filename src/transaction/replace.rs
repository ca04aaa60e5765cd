//! Global operator substitution with structural sharing
//!
//! `try_replace` rebuilds only the nodes whose operator changes and their
//! ancestors, drawing the copies from the backup pool and parking the
//! originals in their place. Untouched subtrees are shared with the original
//! tree, so their caches stay valid. `cancel_replace` swaps the originals
//! back in the exact reverse order.

use super::MoveKind;
use crate::hamiltonian::AtomDiag;
use crate::operator::OpDesc;
use crate::tree::NodeId;
use crate::{ImpurityTrace, TraceError};
use tracing::debug;

impl<D: AtomDiag> ImpurityTrace<D> {
    /// Tentatively substitute every operator through the tables
    ///
    /// `substitute_c[o]` replaces annihilators of orbital `o`,
    /// `substitute_cdag[o]` creators.
    pub fn try_replace(
        &mut self,
        substitute_c: &[OpDesc],
        substitute_cdag: &[OpDesc],
    ) -> Result<(), TraceError> {
        let pending = if self.replace_pending {
            Some(MoveKind::Replace)
        } else if !self.trial_links.is_empty() {
            Some(MoveKind::Insert)
        } else if !self.removed_nodes.is_empty() {
            Some(MoveKind::Delete)
        } else {
            None
        };
        if let Some(pending) = pending {
            return Err(TraceError::TransactionPending {
                requested: MoveKind::Replace,
                pending,
            });
        }
        self.check_substitution(substitute_c)?;
        self.check_substitution(substitute_cdag)?;

        let Some(root) = self.tree.root() else {
            return Ok(());
        };
        let size = self.tree.len();
        self.backup_nodes.reserve(self.tree.arena_mut(), size);
        let new_root = self.shadow_subtree(root, substitute_c, substitute_cdag)?;
        self.tree.set_root(Some(new_root));
        self.replace_pending = true;

        debug!(shadowed = self.backup_nodes.taken(), size, "trial replacement");
        Ok(())
    }

    /// Put the original tree back
    pub fn cancel_replace(&mut self) -> Result<(), TraceError> {
        if !self.replace_pending {
            return Ok(());
        }
        if let Some(root) = self.tree.root() {
            let original = self.restore_subtree(root);
            self.tree.set_root(Some(original));
        }
        self.replace_pending = false;
        debug_assert!(self.backup_nodes.is_reset());

        debug!("replacement cancelled");
        self.maybe_check_integrity()
    }

    /// Keep the substituted tree; the originals stay in the backup pool for
    /// reuse
    pub fn confirm_replace(&mut self) -> Result<(), TraceError> {
        if !self.replace_pending {
            return Ok(());
        }
        let replaced = self.backup_nodes.reset();
        self.update_cache();
        self.replace_pending = false;

        debug!(replaced, "replacement confirmed");
        self.maybe_check_integrity()
    }

    fn check_substitution(&self, table: &[OpDesc]) -> Result<(), TraceError> {
        let n_orbitals = self.config.n_orbitals;
        if table.len() != n_orbitals {
            return Err(TraceError::InvalidConfig(format!(
                "substitution table has {} entries, expected {}",
                table.len(),
                n_orbitals
            )));
        }
        match table.iter().find(|op| op.orbital >= n_orbitals) {
            Some(op) => Err(TraceError::UnknownOrbital {
                orbital: op.orbital,
                n_orbitals,
            }),
            None => Ok(()),
        }
    }

    /// Post-order copy of the changed part of the subtree at `n`
    fn shadow_subtree(
        &mut self,
        n: NodeId,
        substitute_c: &[OpDesc],
        substitute_cdag: &[OpDesc],
    ) -> Result<NodeId, TraceError> {
        let (left, right) = (self.tree.node(n).left, self.tree.node(n).right);
        let new_left = left
            .map(|l| self.shadow_subtree(l, substitute_c, substitute_cdag))
            .transpose()?;
        let new_right = right
            .map(|r| self.shadow_subtree(r, substitute_c, substitute_cdag))
            .transpose()?;

        let node = self.tree.node(n);
        let op = node.op;
        let table = if op.dagger { substitute_cdag } else { substitute_c };
        let new_op = table[op.orbital];
        let op_changed = new_op.orbital != op.orbital;
        if !op_changed && new_left == left && new_right == right {
            return Ok(n);
        }

        let (key, red, size) = (node.key, node.red, node.size);
        let shadow = self
            .backup_nodes
            .swap_next(n)
            .ok_or(TraceError::TrialPoolExhausted {
                capacity: self.backup_nodes.capacity(),
            })?;
        let s = self.tree.node_mut(shadow);
        s.reset(key, if op_changed { new_op } else { op });
        s.left = new_left;
        s.right = new_right;
        s.red = red;
        s.size = size;
        Ok(shadow)
    }

    /// Pre-order (self, right, left) undo of `shadow_subtree`; only shadow
    /// nodes are flagged modified
    fn restore_subtree(&mut self, n: NodeId) -> NodeId {
        let node = self.tree.node(n);
        if !node.modified {
            return n;
        }
        let (left, right) = (node.left, node.right);
        let original = self.backup_nodes.swap_prev(n).unwrap_or(n);
        if let Some(r) = right {
            self.restore_subtree(r);
        }
        if let Some(l) = left {
            self.restore_subtree(l);
        }
        original
    }
}
