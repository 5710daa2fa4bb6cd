use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::inst::{Bgp, Message};
use super::route::{ListenerId, Route};
use super::table::{RouteKey, TableId, TableListener};

/// A predicate plus action registered against a table. The callback runs
/// under the table's serialization, from notification and walk context
/// alike; heavier work belongs on the application's own queue via
/// enqueued table requests.
pub trait ConditionMatch: Send + Sync {
    fn description(&self) -> String;

    /// Invoked for every current and future route of the table. `deleted`
    /// is set when either the route or the match itself is going away, so
    /// the application can revert whatever the earlier match applied.
    fn matched(
        &self,
        bgp: &mut Bgp,
        table: &TableId,
        key: &RouteKey,
        route: &mut Route,
        deleted: bool,
    ) -> bool;
}

pub type MatchId = u64;
pub type MatchDoneFn = Box<dyn FnOnce(&mut Bgp, &TableId) + Send>;

pub struct MatchEntry {
    pub obj: Arc<dyn ConditionMatch>,
    pub deleted: bool,
    pub num_match_state: u32,
}

pub type MatchMap = Arc<Mutex<BTreeMap<MatchId, MatchEntry>>>;

/// Per-table state of the condition listener, shared between the listener
/// registry and the dispatch hook installed on the table. The mutex exists
/// because match state is mutated from table context while applications
/// inspect it from their own tasks.
pub struct ConditionTableState {
    pub listener_id: ListenerId,
    pub matches: MatchMap,
}

/// Table hook: fan out every route notification to the live matches.
struct ConditionDispatch {
    matches: MatchMap,
}

impl TableListener for ConditionDispatch {
    fn notify(&mut self, bgp: &mut Bgp, table: &TableId, key: &RouteKey, route: &mut Route) {
        let matches: Vec<(MatchId, Arc<dyn ConditionMatch>, bool)> = {
            let guard = self.matches.lock().unwrap();
            guard
                .iter()
                .map(|(id, entry)| (*id, entry.obj.clone(), entry.deleted))
                .collect()
        };
        for (_, obj, match_deleted) in matches {
            let deleted = match_deleted || route.paths().is_empty();
            obj.matched(bgp, table, key, route, deleted);
        }
    }
}

/// Per-route state attached under the condition listener's id: one opaque
/// slot per match object.
#[derive(Default)]
pub struct ConditionStateSlot {
    states: BTreeMap<MatchId, Box<dyn Any + Send>>,
}

#[derive(Default)]
pub struct ConditionListener {
    pub tables: BTreeMap<TableId, Arc<ConditionTableState>>,
    next_match_id: MatchId,
}

impl ConditionListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_state(&self, table: &TableId) -> Option<&Arc<ConditionTableState>> {
        self.tables.get(table)
    }

    fn next_id(&mut self) -> MatchId {
        self.next_match_id += 1;
        self.next_match_id
    }
}

impl Bgp {
    /// Register a match condition: future notifications are matched, and a
    /// table walk applies the condition to every existing route. The done
    /// callback fires when the walk completes.
    pub fn condition_add_match(
        &mut self,
        table_id: &TableId,
        obj: Arc<dyn ConditionMatch>,
        done: MatchDoneFn,
    ) -> Option<MatchId> {
        let match_id = self.condition.next_id();

        let state = match self.condition.tables.get(table_id) {
            Some(state) => state.clone(),
            None => {
                // First match on this table: install the dispatch hook.
                let table = self.table_mut(table_id)?;
                let matches: MatchMap = Arc::new(Mutex::new(BTreeMap::new()));
                let listener_id = table.register(Box::new(ConditionDispatch {
                    matches: matches.clone(),
                }));
                let state = Arc::new(ConditionTableState {
                    listener_id,
                    matches,
                });
                self.condition
                    .tables
                    .insert(table_id.clone(), state.clone());
                state
            }
        };

        state.matches.lock().unwrap().insert(
            match_id,
            MatchEntry {
                obj,
                deleted: false,
                num_match_state: 0,
            },
        );

        self.condition_walk(table_id, &state, match_id, done);
        Some(match_id)
    }

    /// Mark a match condition deleted and re-walk so its action sees every
    /// currently matching route with the deleted flag set.
    pub fn condition_remove_match(
        &mut self,
        table_id: &TableId,
        match_id: MatchId,
        done: MatchDoneFn,
    ) {
        let Some(state) = self.condition.tables.get(table_id).cloned() else {
            return;
        };
        if let Some(entry) = state.matches.lock().unwrap().get_mut(&match_id) {
            entry.deleted = true;
        }
        self.condition_walk(table_id, &state, match_id, done);
    }

    /// Final removal, once the application has confirmed all per-route
    /// state is gone. The table registration is purged after the last
    /// match leaves.
    pub fn condition_unregister_match(&mut self, table_id: &TableId, match_id: MatchId) {
        let Some(state) = self.condition.tables.get(table_id).cloned() else {
            return;
        };
        let empty = {
            let mut guard = state.matches.lock().unwrap();
            if let Some(entry) = guard.get(&match_id) {
                assert_eq!(entry.num_match_state, 0, "match state must be removed first");
                guard.remove(&match_id);
            }
            guard.is_empty()
        };
        if empty {
            let _ = self.tx.try_send(Message::ConditionPurge(table_id.clone()));
        }
    }

    /// Purge trigger: drop the table registration once all matches are
    /// unregistered and their walks are done.
    pub fn condition_purge(&mut self, table_id: &TableId) {
        let Some(state) = self.condition.tables.get(table_id).cloned() else {
            return;
        };
        if !state.matches.lock().unwrap().is_empty() {
            return;
        }
        if let Some(table) = self.table_mut(table_id) {
            table.unregister(state.listener_id);
        }
        self.condition.tables.remove(table_id);
        self.retry_delete();
    }

    fn condition_walk(
        &mut self,
        table_id: &TableId,
        state: &Arc<ConditionTableState>,
        match_id: MatchId,
        done: MatchDoneFn,
    ) {
        let walk_state = state.clone();
        let entry_fn = Box::new(
            move |bgp: &mut Bgp, table: &TableId, key: &RouteKey, route: &mut Route| {
                let found = {
                    let guard = walk_state.matches.lock().unwrap();
                    guard
                        .get(&match_id)
                        .map(|entry| (entry.obj.clone(), entry.deleted))
                };
                if let Some((obj, match_deleted)) = found {
                    let deleted = match_deleted || route.paths().is_empty();
                    obj.matched(bgp, table, key, route, deleted);
                }
            },
        );
        let Some(table) = self.table_mut(table_id) else {
            return;
        };
        let walker_id = table.allocate_walker(entry_fn, done);
        if table.walk_table(walker_id) {
            let _ = self.tx.try_send(Message::WalkTable(table_id.clone()));
        }
    }
}

// ---- per-(route, match) state helpers ----

/// Attach opaque state for a match to a route. The listener id namespaces
/// the slot; the match-state count keeps the match object alive until the
/// application cleans up.
pub fn set_match_state(
    route: &mut Route,
    state: &ConditionTableState,
    match_id: MatchId,
    value: Box<dyn Any + Send>,
) {
    let slot = match route.get_state_mut(state.listener_id) {
        Some(slot) => slot,
        None => {
            route.set_state(state.listener_id, Box::new(ConditionStateSlot::default()));
            route.get_state_mut(state.listener_id).unwrap()
        }
    };
    let slot = slot
        .as_any_mut()
        .downcast_mut::<ConditionStateSlot>()
        .expect("condition state slot");
    if slot.states.insert(match_id, value).is_none() {
        if let Some(entry) = state.matches.lock().unwrap().get_mut(&match_id) {
            entry.num_match_state += 1;
        }
    }
}

pub fn check_match_state(route: &Route, state: &ConditionTableState, match_id: MatchId) -> bool {
    route
        .get_state(state.listener_id)
        .and_then(|slot| slot.as_any().downcast_ref::<ConditionStateSlot>())
        .map(|slot| slot.states.contains_key(&match_id))
        .unwrap_or(false)
}

pub fn get_match_state<'a, T: 'static>(
    route: &'a Route,
    state: &ConditionTableState,
    match_id: MatchId,
) -> Option<&'a T> {
    route
        .get_state(state.listener_id)
        .and_then(|slot| slot.as_any().downcast_ref::<ConditionStateSlot>())
        .and_then(|slot| slot.states.get(&match_id))
        .and_then(|value| value.downcast_ref::<T>())
}

/// Remove the state for one match; drops the whole slot when it was the
/// last one so the route can be reclaimed.
pub fn remove_match_state(
    route: &mut Route,
    state: &ConditionTableState,
    match_id: MatchId,
) -> bool {
    let Some(slot) = route.get_state_mut(state.listener_id) else {
        return false;
    };
    let slot_ref = slot
        .as_any_mut()
        .downcast_mut::<ConditionStateSlot>()
        .expect("condition state slot");
    let removed = slot_ref.states.remove(&match_id).is_some();
    let empty = slot_ref.states.is_empty();
    if removed {
        if let Some(entry) = state.matches.lock().unwrap().get_mut(&match_id) {
            entry.num_match_state = entry.num_match_state.saturating_sub(1);
        }
    }
    if empty {
        route.clear_state(state.listener_id);
    }
    removed
}
