use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};

use crate::common::{KeelDBError, PageID, Result, TransactionID};
use crate::lock::WaitForGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    pub fn is_compatible(self, other: LockMode) -> bool {
        self == LockMode::Shared && other == LockMode::Shared
    }

    // Holding `self` already satisfies a request for `requested`
    pub fn covers(self, requested: LockMode) -> bool {
        self == LockMode::Exclusive || requested == LockMode::Shared
    }
}

struct LockRequest {
    txn_id: TransactionID,
    mode: LockMode,
    granted: bool,
    // Notified only when this particular request is granted or cancelled
    signal: Arc<Condvar>,
}

impl LockRequest {
    fn new(txn_id: TransactionID, mode: LockMode, granted: bool) -> Self {
        Self {
            txn_id,
            mode,
            granted,
            signal: Arc::new(Condvar::new()),
        }
    }
}

enum RequestOutcome {
    Granted,
    Queued(Arc<Condvar>),
}

enum PollOutcome {
    Granted,
    Waiting,
    Victim,
}

#[derive(Default)]
struct LockTable {
    queues: HashMap<PageID, Vec<LockRequest>>,
    held: HashMap<TransactionID, HashSet<PageID>>,
    // Chosen by deadlock detection, not yet told
    victims: HashSet<TransactionID>,
}

fn compatible_with_others(queue: &[LockRequest], txn_id: TransactionID, mode: LockMode) -> bool {
    queue
        .iter()
        .filter(|r| r.granted && r.txn_id != txn_id)
        .all(|r| r.mode.is_compatible(mode))
}

impl LockTable {
    fn request(&mut self, txn_id: TransactionID, resource: PageID, mode: LockMode) -> RequestOutcome {
        let queue = self.queues.entry(resource).or_default();

        if let Some(held) = queue.iter().find(|r| r.txn_id == txn_id && r.granted) {
            if held.mode.covers(mode) {
                return RequestOutcome::Granted;
            }
        }

        if let Some(waiting) = queue.iter().find(|r| r.txn_id == txn_id && !r.granted) {
            return RequestOutcome::Queued(Arc::clone(&waiting.signal));
        }

        if compatible_with_others(queue, txn_id, mode) {
            // Sole holder upgrading from Shared keeps its place in the queue
            match queue.iter_mut().find(|r| r.txn_id == txn_id && r.granted) {
                Some(held) => held.mode = mode,
                None => queue.push(LockRequest::new(txn_id, mode, true)),
            }
            self.held.entry(txn_id).or_default().insert(resource);
            return RequestOutcome::Granted;
        }

        let request = LockRequest::new(txn_id, mode, false);
        let signal = Arc::clone(&request.signal);
        queue.push(request);
        RequestOutcome::Queued(signal)
    }

    fn poll(&mut self, txn_id: TransactionID, resource: PageID) -> PollOutcome {
        if self.victims.remove(&txn_id) {
            return PollOutcome::Victim;
        }

        let waiting = self
            .queues
            .get(&resource)
            .map(|queue| queue.iter().any(|r| r.txn_id == txn_id && !r.granted))
            .unwrap_or(false);

        if waiting {
            PollOutcome::Waiting
        } else {
            PollOutcome::Granted
        }
    }

    // Grants, in queue order, every waiter compatible with the current
    // grants and wakes exactly those. There is no barging guard: a waiter
    // behind an incompatible one is still granted if it fits, and `request`
    // admits a new reader next to granted readers while a writer waits. A
    // steady stream of readers can starve a queued writer.
    fn grant_waiters(&mut self, resource: PageID) {
        let queue = match self.queues.get_mut(&resource) {
            Some(queue) => queue,
            None => return,
        };

        let mut i = 0;
        while i < queue.len() {
            if queue[i].granted || !compatible_with_others(queue, queue[i].txn_id, queue[i].mode) {
                i += 1;
                continue;
            }

            let txn_id = queue[i].txn_id;
            queue[i].granted = true;
            queue[i].signal.notify_one();
            trace!("Granted {:?} lock on {} to {}", queue[i].mode, resource, txn_id);

            // A granted upgrade replaces the weaker grant it was waiting on
            if let Some(old) = queue
                .iter()
                .enumerate()
                .position(|(j, r)| j != i && r.txn_id == txn_id && r.granted)
            {
                queue.remove(old);
                if old < i {
                    i -= 1;
                }
            }

            self.held.entry(txn_id).or_default().insert(resource);
            i += 1;
        }
    }

    fn remove_requests(&mut self, txn_id: TransactionID, resource: PageID) {
        if let Some(queue) = self.queues.get_mut(&resource) {
            queue.retain(|r| r.txn_id != txn_id);
            if queue.is_empty() {
                self.queues.remove(&resource);
            }
        }

        if let Some(resources) = self.held.get_mut(&txn_id) {
            resources.remove(&resource);
            if resources.is_empty() {
                self.held.remove(&txn_id);
            }
        }
    }

    fn cancel_waiting(&mut self, txn_id: TransactionID) {
        let mut touched = Vec::new();
        for (resource, queue) in self.queues.iter_mut() {
            let before = queue.len();
            queue.retain(|r| {
                let cancelled = r.txn_id == txn_id && !r.granted;
                if cancelled {
                    r.signal.notify_one();
                }
                !cancelled
            });
            if queue.len() != before {
                touched.push(*resource);
            }
        }

        for resource in touched {
            self.grant_waiters(resource);
            if self.queues.get(&resource).map_or(false, Vec::is_empty) {
                self.queues.remove(&resource);
            }
        }
    }

    fn wait_for_graph(&self) -> WaitForGraph {
        let mut graph = WaitForGraph::new();
        for queue in self.queues.values() {
            for waiter in queue.iter().filter(|r| !r.granted) {
                for holder in queue.iter().filter(|r| r.granted && r.txn_id != waiter.txn_id) {
                    if !holder.mode.is_compatible(waiter.mode) {
                        graph.add_edge(waiter.txn_id, holder.txn_id);
                    }
                }
            }
        }
        graph
    }

    fn detect_deadlock(&mut self) -> Vec<TransactionID> {
        let mut victims = Vec::new();

        loop {
            let graph = self.wait_for_graph();
            let cycle = match graph.find_cycle() {
                Some(cycle) => cycle,
                None => break,
            };
            let victim = match WaitForGraph::choose_victim(&cycle) {
                Some(victim) => victim,
                None => break,
            };

            warn!("Deadlock among {:?}: aborting {}", cycle, victim);
            self.victims.insert(victim);
            self.cancel_waiting(victim);
            victims.push(victim);
        }

        victims
    }
}

/// Strict two-phase lock table over pages.
///
/// Blocking acquisition parks the caller on a condition variable owned by its
/// own request; while parked, the caller re-runs deadlock detection every
/// `check_interval`.
pub struct LockManager {
    table: Mutex<LockTable>,
    check_interval: Duration,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

impl LockManager {
    pub fn new(check_interval: Duration) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            check_interval,
        }
    }

    pub fn acquire(&self, txn_id: TransactionID, resource: PageID, mode: LockMode) -> Result<()> {
        let mut table = self.table.lock();
        if table.victims.remove(&txn_id) {
            return Err(KeelDBError::DeadlockAborted(txn_id));
        }

        let signal = match table.request(txn_id, resource, mode) {
            RequestOutcome::Granted => return Ok(()),
            RequestOutcome::Queued(signal) => signal,
        };

        debug!("{} waits for {:?} lock on {}", txn_id, mode, resource);

        loop {
            table.detect_deadlock();
            match table.poll(txn_id, resource) {
                PollOutcome::Granted => return Ok(()),
                PollOutcome::Victim => return Err(KeelDBError::DeadlockAborted(txn_id)),
                PollOutcome::Waiting => {}
            }
            signal.wait_for(&mut table, self.check_interval);
        }
    }

    pub fn try_acquire(&self, txn_id: TransactionID, resource: PageID, mode: LockMode) -> Result<()> {
        let mut table = self.table.lock();
        if table.victims.remove(&txn_id) {
            return Err(KeelDBError::DeadlockAborted(txn_id));
        }

        if let RequestOutcome::Granted = table.request(txn_id, resource, mode) {
            return Ok(());
        }

        table.detect_deadlock();
        match table.poll(txn_id, resource) {
            PollOutcome::Granted => Ok(()),
            PollOutcome::Victim => Err(KeelDBError::DeadlockAborted(txn_id)),
            PollOutcome::Waiting => Err(KeelDBError::WouldBlock),
        }
    }

    pub fn release(&self, txn_id: TransactionID, resource: PageID) {
        let mut table = self.table.lock();
        table.remove_requests(txn_id, resource);
        table.grant_waiters(resource);
    }

    // Drops every grant and pending request of the transaction
    pub fn release_all(&self, txn_id: TransactionID) {
        let mut table = self.table.lock();
        table.victims.remove(&txn_id);

        let resources: Vec<PageID> = table
            .queues
            .iter()
            .filter(|(_, queue)| queue.iter().any(|r| r.txn_id == txn_id))
            .map(|(resource, _)| *resource)
            .collect();

        for resource in resources {
            table.remove_requests(txn_id, resource);
            table.grant_waiters(resource);
        }
        table.held.remove(&txn_id);

        trace!("Released all locks of {}", txn_id);
    }

    pub fn detect_deadlock(&self) -> Vec<TransactionID> {
        self.table.lock().detect_deadlock()
    }

    pub fn holders(&self, resource: PageID) -> Vec<(TransactionID, LockMode)> {
        let table = self.table.lock();
        table
            .queues
            .get(&resource)
            .map(|queue| {
                queue
                    .iter()
                    .filter(|r| r.granted)
                    .map(|r| (r.txn_id, r.mode))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn held_by(&self, txn_id: TransactionID) -> Vec<PageID> {
        let table = self.table.lock();
        let mut resources: Vec<PageID> = table
            .held
            .get(&txn_id)
            .map(|resources| resources.iter().copied().collect())
            .unwrap_or_default();
        resources.sort();
        resources
    }

    pub fn holds(&self, txn_id: TransactionID, resource: PageID) -> bool {
        let table = self.table.lock();
        table
            .held
            .get(&txn_id)
            .map_or(false, |resources| resources.contains(&resource))
    }

    pub fn waiting_for(&self, txn_id: TransactionID) -> Option<PageID> {
        let table = self.table.lock();
        table
            .queues
            .iter()
            .find(|(_, queue)| queue.iter().any(|r| r.txn_id == txn_id && !r.granted))
            .map(|(resource, _)| *resource)
    }

    pub fn wait_for_graph(&self) -> WaitForGraph {
        self.table.lock().wait_for_graph()
    }
}
