//! Staged role reordering against a live committed order.
//!
//! The editor keeps two copies of the role list: `committed` (what the
//! store last showed) and `staged` (what the user is arranging). Remote
//! snapshots are adopted into the staged list unless the user has unsaved
//! edits; a drag in progress pauses adoption entirely so the list cannot
//! jump mid-gesture. A remote add or remove always forces a resync, even
//! over unsaved edits.
//!
//! Saving goes through the all-positions batch write and carries a lost
//! update check: if the committed order moved underneath the staged edits,
//! the save is rejected instead of silently clobbering the other client.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::Error;
use crate::model::Role;
use crate::roles::{RoleManager, seniority};
use crate::store::KeyedStore;

/// Where the staged order stands relative to the committed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditState {
    Clean,
    Dirty,
    Saving,
}

/// Reorder state for one server's role list.
pub struct RoleOrderEditor<S> {
    manager: RoleManager<S>,
    server_id: String,
    committed: Vec<Role>,
    staged: Vec<Role>,
    state: EditState,
    reordering: bool,
    committed_revision: u64,
    staged_base: u64,
}

impl<S: KeyedStore> RoleOrderEditor<S> {
    pub fn new(store: Arc<S>, server_id: impl Into<String>) -> Self {
        Self {
            manager: RoleManager::new(store),
            server_id: server_id.into(),
            committed: Vec::new(),
            staged: Vec::new(),
            state: EditState::Clean,
            reordering: false,
            committed_revision: 0,
            staged_base: 0,
        }
    }

    pub fn staged(&self) -> &[Role] {
        &self.staged
    }

    pub fn committed(&self) -> &[Role] {
        &self.committed
    }

    pub fn state(&self) -> EditState {
        self.state
    }

    pub fn is_reordering(&self) -> bool {
        self.reordering
    }

    /// Unsaved edits: the staged id sequence differs elementwise from the
    /// committed one. Lists of different lengths are never dirty; that
    /// case resyncs instead (see [`Self::apply_committed`]).
    pub fn is_dirty(&self) -> bool {
        self.staged.len() == self.committed.len()
            && self
                .staged
                .iter()
                .zip(&self.committed)
                .any(|(staged, committed)| staged.id != committed.id)
    }

    /// Read the current roles from the store and adopt them.
    pub async fn load(&mut self) -> Result<(), Error> {
        let roles = self.manager.roles(&self.server_id).await?;
        self.apply_committed(roles);
        Ok(())
    }

    /// Feed a committed snapshot in (any order; it is re-sorted for
    /// display). The staged list adopts it unless a drag is in progress or
    /// there are unsaved edits over the same role set. A changed role
    /// count always resyncs, dropping unsaved edits.
    pub fn apply_committed(&mut self, mut roles: Vec<Role>) {
        roles.sort_by(|a, b| seniority(b, a));
        self.committed = roles;
        self.committed_revision += 1;

        if self.reordering {
            debug!(server_id = %self.server_id, "drag in progress, staged order kept");
            return;
        }
        if self.state == EditState::Saving {
            return;
        }
        self.adopt_committed();
    }

    /// Mark the start of a drag gesture. Until [`Self::end_reorder`], no
    /// committed snapshot touches the staged list.
    pub fn begin_reorder(&mut self) {
        self.reordering = true;
    }

    /// End the drag gesture and re-run adoption against whatever committed
    /// order arrived in the meantime.
    pub fn end_reorder(&mut self) {
        self.reordering = false;
        if self.state != EditState::Saving {
            self.adopt_committed();
        }
    }

    /// Move the staged role at `from` to sit at `to`.
    pub fn move_role(&mut self, from: usize, to: usize) -> Result<(), Error> {
        if from >= self.staged.len() || to >= self.staged.len() {
            return Err(Error::invalid_argument(format!(
                "move {} -> {} out of range for {} roles",
                from,
                to,
                self.staged.len()
            )));
        }
        let role = self.staged.remove(from);
        self.staged.insert(to, role);
        self.refresh_state();
        Ok(())
    }

    /// Discard staged edits.
    pub fn reset(&mut self) {
        self.staged = self.committed.clone();
        self.staged_base = self.committed_revision;
        self.refresh_state();
    }

    /// Write the staged order through the all-positions batch update.
    ///
    /// Fails `OrderOutOfDate` without writing when the committed order has
    /// changed since the staged list last synced to it; the caller resets
    /// (or re-stages) and tries again. On success the staged order becomes
    /// the committed one.
    pub async fn save(&mut self) -> Result<(), Error> {
        if !self.is_dirty() {
            debug!(server_id = %self.server_id, "no staged changes to save");
            return Ok(());
        }
        if self.staged_base != self.committed_revision {
            return Err(Error::OrderOutOfDate);
        }

        self.state = EditState::Saving;
        let count = self.staged.len() as i64;
        let mut saved = self.staged.clone();
        for (index, role) in saved.iter_mut().enumerate() {
            role.position = count - index as i64;
        }
        let ordered: Vec<String> = saved.iter().map(|role| role.id.clone()).collect();

        match self
            .manager
            .batch_update_roles(&self.server_id, &ordered)
            .await
        {
            Ok(()) => {
                self.committed_revision += 1;
                self.committed = saved;
                self.staged = self.committed.clone();
                self.staged_base = self.committed_revision;
                self.state = EditState::Clean;
                info!(server_id = %self.server_id, roles = count, "saved role order");
                Ok(())
            }
            Err(err) => {
                self.state = EditState::Dirty;
                Err(err)
            }
        }
    }

    /// Adopt the committed list into the staged one when allowed.
    fn adopt_committed(&mut self) {
        if self.is_dirty() {
            debug!(server_id = %self.server_id, "unsaved reorder kept over remote snapshot");
        } else {
            if !ids_equal(&self.staged, &self.committed) && !self.staged.is_empty() {
                debug!(server_id = %self.server_id, "staged order resynced from committed");
            }
            self.staged = self.committed.clone();
            self.staged_base = self.committed_revision;
        }
        self.refresh_state();
    }

    fn refresh_state(&mut self) {
        if self.state != EditState::Saving {
            self.state = if self.is_dirty() {
                EditState::Dirty
            } else {
                EditState::Clean
            };
        }
    }
}

fn ids_equal(a: &[Role], b: &[Role]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.id == y.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DEFAULT_ROLE_COLOR;
    use crate::roles::permissions::Permissions;
    use crate::store::MemoryStore;

    async fn editor_with_roles(
        names: &[&str],
    ) -> (Arc<MemoryStore>, RoleOrderEditor<MemoryStore>, Vec<String>) {
        let store = Arc::new(MemoryStore::new());
        let manager = RoleManager::new(store.clone());
        let mut ids = Vec::new();
        for name in names {
            ids.push(
                manager
                    .create_role("s1", name, DEFAULT_ROLE_COLOR, Permissions::empty())
                    .await
                    .unwrap(),
            );
        }
        let mut editor = RoleOrderEditor::new(store.clone(), "s1");
        editor.load().await.unwrap();
        // Creation stacks upward, so display order is reversed.
        ids.reverse();
        (store, editor, ids)
    }

    fn staged_ids(editor: &RoleOrderEditor<MemoryStore>) -> Vec<String> {
        editor.staged().iter().map(|r| r.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_load_sorts_most_senior_first() {
        let (_, editor, ids) = editor_with_roles(&["a", "b", "c"]).await;
        assert_eq!(staged_ids(&editor), ids);
        assert_eq!(editor.state(), EditState::Clean);
        assert!(!editor.is_dirty());
    }

    #[tokio::test]
    async fn test_move_marks_dirty_and_moving_back_clears_it() {
        let (_, mut editor, _) = editor_with_roles(&["a", "b"]).await;

        editor.move_role(0, 1).unwrap();
        assert_eq!(editor.state(), EditState::Dirty);
        assert!(editor.is_dirty());

        editor.move_role(1, 0).unwrap();
        assert_eq!(editor.state(), EditState::Clean);
    }

    #[tokio::test]
    async fn test_move_out_of_range_is_invalid() {
        let (_, mut editor, _) = editor_with_roles(&["a", "b"]).await;
        let err = editor.move_role(0, 5).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_drag_blocks_adoption_until_it_ends() {
        let (store, mut editor, ids) = editor_with_roles(&["a", "b", "c"]).await;
        let manager = RoleManager::new(store);

        editor.begin_reorder();

        // Another client reorders while our drag is in flight.
        let mut remote: Vec<String> = ids.clone();
        remote.reverse();
        manager.batch_update_roles("s1", &remote).await.unwrap();
        let roles = manager.roles("s1").await.unwrap();
        editor.apply_committed(roles);

        // Even a clean editor keeps its staged list mid-drag.
        assert_eq!(staged_ids(&editor), ids);

        editor.end_reorder();
        assert_eq!(staged_ids(&editor), remote);
    }

    #[tokio::test]
    async fn test_remote_reorder_does_not_clobber_unsaved_edits() {
        let (store, mut editor, ids) = editor_with_roles(&["a", "b", "c"]).await;
        let manager = RoleManager::new(store);

        editor.move_role(0, 2).unwrap();
        let mine = staged_ids(&editor);

        let mut remote = ids.clone();
        remote.swap(0, 1);
        manager.batch_update_roles("s1", &remote).await.unwrap();
        editor.apply_committed(manager.roles("s1").await.unwrap());

        assert_eq!(staged_ids(&editor), mine);
        assert_eq!(editor.state(), EditState::Dirty);
    }

    #[tokio::test]
    async fn test_role_count_change_forces_resync() {
        let (store, mut editor, _) = editor_with_roles(&["a", "b"]).await;
        let manager = RoleManager::new(store);

        editor.move_role(0, 1).unwrap();
        assert!(editor.is_dirty());

        manager
            .create_role("s1", "c", DEFAULT_ROLE_COLOR, Permissions::empty())
            .await
            .unwrap();
        editor.apply_committed(manager.roles("s1").await.unwrap());

        // Unsaved edits are gone; the staged list matches the store again.
        assert_eq!(editor.state(), EditState::Clean);
        assert_eq!(staged_ids(&editor).len(), 3);
    }

    #[tokio::test]
    async fn test_save_writes_descending_positions() {
        let (store, mut editor, ids) = editor_with_roles(&["a", "b", "c"]).await;

        // Stage: move the bottom role to the top.
        editor.move_role(2, 0).unwrap();
        editor.save().await.unwrap();

        assert_eq!(editor.state(), EditState::Clean);
        let manager = RoleManager::new(store);
        let roles = manager.roles("s1").await.unwrap();
        let expect: Vec<&str> = vec![&ids[2], &ids[0], &ids[1]];
        let got: Vec<&str> = roles.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(got, expect);
        assert_eq!(
            roles.iter().map(|r| r.position).collect::<Vec<_>>(),
            vec![3, 2, 1]
        );
    }

    #[tokio::test]
    async fn test_save_when_clean_is_a_noop() {
        let (store, mut editor, _) = editor_with_roles(&["a", "b"]).await;
        store.deny_writes_under("servers/s1");
        // Nothing staged, so nothing is written and nothing fails.
        editor.save().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_reorder_is_rejected_as_lost_update() {
        let (store, mut editor, ids) = editor_with_roles(&["a", "b", "c"]).await;
        let manager = RoleManager::new(store);

        editor.move_role(0, 2).unwrap();

        // The committed order moves underneath the staged edits.
        let mut remote = ids.clone();
        remote.swap(1, 2);
        manager.batch_update_roles("s1", &remote).await.unwrap();
        editor.apply_committed(manager.roles("s1").await.unwrap());

        let err = editor.save().await.unwrap_err();
        assert_eq!(err, Error::OrderOutOfDate);
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);

        // Nothing was written; the remote order is intact.
        let roles = manager.roles("s1").await.unwrap();
        let got: Vec<&str> = roles.iter().map(|r| r.id.as_str()).collect();
        let want: Vec<&str> = remote.iter().map(String::as_str).collect();
        assert_eq!(got, want);

        // Reset onto the fresh order, restage, save.
        editor.reset();
        assert_eq!(editor.state(), EditState::Clean);
        editor.move_role(0, 1).unwrap();
        editor.save().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_save_returns_to_dirty() {
        let (store, mut editor, _) = editor_with_roles(&["a", "b"]).await;

        editor.move_role(0, 1).unwrap();
        let staged = staged_ids(&editor);

        store.set_offline(true);
        let err = editor.save().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unavailable);
        assert_eq!(editor.state(), EditState::Dirty);
        assert_eq!(staged_ids(&editor), staged);

        store.set_offline(false);
        editor.save().await.unwrap();
        assert_eq!(editor.state(), EditState::Clean);
    }

    #[tokio::test]
    async fn test_reset_discards_staged_edits() {
        let (_, mut editor, ids) = editor_with_roles(&["a", "b", "c"]).await;
        editor.move_role(0, 2).unwrap();
        assert!(editor.is_dirty());

        editor.reset();
        assert_eq!(staged_ids(&editor), ids);
        assert_eq!(editor.state(), EditState::Clean);
    }
}
