//! UI-facing state for a deployment's mod list
//!
//! The board owns the picked set, the current search results and the run
//! status behind a `watch` channel. Views subscribe and render snapshots;
//! every change is applied as one whole-state update so no view ever sees a
//! half-merged list.

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::catalog::ModCatalog;
use crate::core::{ModId, ModMetadata, PickedSet, ResolveError, ResolveStatus, Result};
use crate::pipeline::ModResolver;
use crate::script::ScriptRuntime;

/// Snapshot of everything the mod list view renders
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardState {
    pub picked: PickedSet,
    /// Search results not yet picked
    pub search: Vec<ModMetadata>,
    pub status: ResolveStatus,
    pub searching: bool,
    /// Mods whose single-add is in flight
    pub adding: BTreeSet<ModId>,
}

/// Mod list state holder driving the resolver
pub struct ModBoard<C, R: ScriptRuntime> {
    resolver: Arc<ModResolver<C, R>>,
    state: watch::Sender<BoardState>,
}

impl<C: ModCatalog, R: ScriptRuntime> ModBoard<C, R> {
    pub fn new(resolver: Arc<ModResolver<C, R>>) -> Self {
        let (state, _) = watch::channel(BoardState::default());
        Self { resolver, state }
    }

    pub fn resolver(&self) -> &ModResolver<C, R> {
        &self.resolver
    }

    pub fn subscribe(&self) -> watch::Receiver<BoardState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> BoardState {
        self.state.borrow().clone()
    }

    /// Replace the picked set with the mods of an existing deployment
    ///
    /// On failure the previous picked set is kept and the status turns to
    /// `Failed`. A cancelled run keeps the picked set and puts the status back
    /// to what it was before the run.
    pub async fn load_existing(&self, blob: &str, cancel: &CancellationToken) -> Result<()> {
        let previous = self.state.borrow().status.clone();
        self.state.send_modify(|state| state.status = ResolveStatus::Resolving);

        let result = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.resolver.resolve_existing_mods(blob) => Some(result),
        };
        let result = match result {
            Some(result) if !cancel.is_cancelled() => result,
            _ => {
                self.state.send_if_modified(|state| {
                    if !state.status.is_resolving() {
                        return false;
                    }
                    state.status = previous;
                    true
                });
                return Err(cancelled("mod list view closed while resolving"));
            }
        };

        match result {
            Ok(picked) => {
                debug!("Loaded {} picked mods", picked.len());
                self.state.send_modify(|state| {
                    state.picked = picked;
                    state.search.retain(|m| !state.picked.contains(&m.id));
                    state.status = ResolveStatus::Idle;
                });
                Ok(())
            }
            Err(err) => {
                self.state
                    .send_modify(|state| state.status = ResolveStatus::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    /// Attach one mod from the search results
    ///
    /// The mod is appended to the picked set, replacing an entry with the same
    /// id, and dropped from the search results. A second add of a mod whose
    /// add is still in flight is ignored. A cancelled add releases the mod so
    /// it can be added again.
    pub async fn add_mod(&self, metadata: ModMetadata, cancel: &CancellationToken) -> Result<()> {
        let id = metadata.id.clone();
        let started = self.state.send_if_modified(|state| state.adding.insert(id.clone()));
        if !started {
            debug!("Mod {} is already being added", id);
            return Ok(());
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.resolver.resolve_one_mod(metadata) => Some(result),
        };
        let result = match result {
            Some(result) if !cancel.is_cancelled() => result,
            _ => {
                self.state.send_if_modified(|state| state.adding.remove(&id));
                return Err(cancelled("mod list view closed while adding a mod"));
            }
        };

        match result {
            Ok(resolved) => {
                self.state.send_modify(|state| {
                    state.adding.remove(&id);
                    state.search.retain(|m| m.id != id);
                    if state.picked.insert(resolved).is_some() {
                        debug!("Replaced already picked mod {}", id);
                    }
                });
                Ok(())
            }
            Err(err) => {
                warn!("Adding mod {} failed: {}", id, err);
                self.state.send_modify(|state| {
                    state.adding.remove(&id);
                    if !state.status.is_resolving() {
                        state.status = ResolveStatus::Failed(err.to_string());
                    }
                });
                Err(err)
            }
        }
    }

    /// Detach a mod; returns whether it was picked
    pub fn remove_mod(&self, id: &ModId) -> bool {
        self.state.send_if_modified(|state| state.picked.remove(id).is_some())
    }

    /// Search the catalog, hiding mods that are already picked
    ///
    /// Blank text clears the results.
    pub async fn search(&self, text: &str, cancel: &CancellationToken) -> Result<()> {
        if text.trim().is_empty() {
            self.state.send_modify(|state| state.search.clear());
            return Ok(());
        }

        self.state.send_modify(|state| state.searching = true);
        let result = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.resolver.search(text) => Some(result),
        };
        let result = match result {
            Some(result) if !cancel.is_cancelled() => result,
            _ => {
                self.state.send_modify(|state| state.searching = false);
                return Err(cancelled("mod list view closed while searching"));
            }
        };

        match result {
            Ok(found) => {
                self.state.send_modify(|state| {
                    state.searching = false;
                    state.search = found
                        .into_iter()
                        .filter(|m| !state.picked.contains(&m.id))
                        .collect();
                });
                Ok(())
            }
            Err(err) => {
                self.state.send_modify(|state| state.searching = false);
                Err(err)
            }
        }
    }
}

fn cancelled(reason: &str) -> ResolveError {
    ResolveError::Cancelled {
        reason: reason.to_string(),
    }
}
