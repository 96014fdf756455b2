//! In-process store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{OutboxMarker, OutboxStore, RunStore};
use crate::error::{Error, Result};
use crate::model::{Run, RunId, RunWithSteps, Step, Zap, ZapId};

/// [`RunStore`] and [`OutboxStore`] held in memory.
///
/// Cloning shares the underlying state. The `fail_next_*` methods inject
/// [`Error::Unavailable`] faults so tests can exercise retry and atomicity
/// paths without a database.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    zaps: HashMap<ZapId, ZapEntry>,
    runs: HashMap<RunId, Run>,
    // Keyed by (created_at, id) so polling returns oldest first.
    markers: BTreeMap<(OffsetDateTime, Uuid), RunId>,
    fail_marker_inserts: u32,
    fail_polls: u32,
    fail_deletes: u32,
    fail_loads: u32,
}

#[derive(Debug)]
struct ZapEntry {
    zap: Zap,
    steps: Vec<Step>,
}

fn take_fault(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a zap with its steps.
    pub fn insert_zap(&self, zap: Zap, steps: Vec<Step>) {
        self.state()
            .zaps
            .insert(zap.id.clone(), ZapEntry { zap, steps });
    }

    /// Delete a zap. Its runs stay behind but no longer load.
    pub fn remove_zap(&self, zap_id: &ZapId) {
        self.state().zaps.remove(zap_id);
    }

    pub fn set_active(&self, zap_id: &ZapId, active: bool) {
        if let Some(entry) = self.state().zaps.get_mut(zap_id) {
            entry.zap.active = active;
        }
    }

    /// All recorded runs, oldest first.
    pub fn runs(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = self.state().runs.values().cloned().collect();
        runs.sort_by_key(|run| run.id);
        runs
    }

    /// Pending markers, oldest first.
    pub fn markers(&self) -> Vec<OutboxMarker> {
        self.state()
            .markers
            .iter()
            .map(|(&(created_at, id), &run_id)| OutboxMarker {
                id,
                run_id,
                created_at,
            })
            .collect()
    }

    /// Make the next `n` marker inserts fail after the run row is staged.
    pub fn fail_next_marker_inserts(&self, n: u32) {
        self.state().fail_marker_inserts = n;
    }

    /// Make the next `n` calls to [`OutboxStore::poll_markers`] fail.
    pub fn fail_next_polls(&self, n: u32) {
        self.state().fail_polls = n;
    }

    /// Make the next `n` calls to [`OutboxStore::delete_markers`] fail,
    /// as if the relay died between publishing and deleting.
    pub fn fail_next_deletes(&self, n: u32) {
        self.state().fail_deletes = n;
    }

    /// Make the next `n` calls to [`RunStore::load_run_with_steps`] fail.
    pub fn fail_next_loads(&self, n: u32) {
        self.state().fail_loads = n;
    }
}

impl RunStore for MemoryStore {
    async fn find_zap(&self, zap_id: &ZapId) -> Result<Option<Zap>> {
        Ok(self.state().zaps.get(zap_id).map(|entry| entry.zap.clone()))
    }

    async fn create_run_with_marker(&self, zap_id: &ZapId, metadata: Value) -> Result<RunId> {
        let mut state = self.state();

        let run = Run {
            id: RunId::new(),
            zap_id: zap_id.clone(),
            metadata,
            created_at: OffsetDateTime::now_utc(),
        };
        let marker_key = (run.created_at, Uuid::now_v7());

        // Both rows are staged before either is applied, so a failing marker
        // insert leaves no run behind.
        if take_fault(&mut state.fail_marker_inserts) {
            return Err(Error::Unavailable("outbox marker insert failed".into()));
        }

        let run_id = run.id;
        state.runs.insert(run_id, run);
        state.markers.insert(marker_key, run_id);
        Ok(run_id)
    }

    async fn load_run_with_steps(&self, run_id: RunId) -> Result<RunWithSteps> {
        let mut state = self.state();

        if take_fault(&mut state.fail_loads) {
            return Err(Error::Unavailable("run store unavailable".into()));
        }

        let run = state.runs.get(&run_id).ok_or(Error::RunNotFound(run_id))?;
        let entry = state
            .zaps
            .get(&run.zap_id)
            .ok_or(Error::RunNotFound(run_id))?;

        Ok(RunWithSteps::new(run.clone(), entry.steps.clone()))
    }
}

impl OutboxStore for MemoryStore {
    async fn poll_markers(&self, limit: u32) -> Result<Vec<OutboxMarker>> {
        let mut state = self.state();

        if take_fault(&mut state.fail_polls) {
            return Err(Error::Unavailable("run store unavailable".into()));
        }

        Ok(state
            .markers
            .iter()
            .take(limit as usize)
            .map(|(&(created_at, id), &run_id)| OutboxMarker {
                id,
                run_id,
                created_at,
            })
            .collect())
    }

    async fn delete_markers(&self, ids: &[Uuid]) -> Result<u64> {
        let mut state = self.state();

        if take_fault(&mut state.fail_deletes) {
            return Err(Error::Unavailable("run store unavailable".into()));
        }

        let before = state.markers.len();
        state.markers.retain(|(_, id), _| !ids.contains(id));
        Ok((before - state.markers.len()) as u64)
    }
}
