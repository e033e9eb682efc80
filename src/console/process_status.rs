//! Generation-aged view of every worker and agent that has reported in.
//!
//! Each control event (start, reset, stop) opens a new generation. Entries
//! that have not reported since the last event are marked on one flush and
//! purged on the next, so a process that stops reporting disappears after
//! two flush periods.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::communication::{
    AgentProcessStatus, MessageHandler, WireMessage, WorkerProcessStatus,
};
use crate::error::AppResult;

pub const UPDATE_PERIOD: Duration = Duration::from_millis(500);
pub const FLUSH_PERIOD: Duration = Duration::from_millis(2000);

/// Observer of status snapshots.
pub trait ProcessStatusListener: Send + Sync {
    /// `processes` is sorted by state, then name. `running_threads` and
    /// `total_threads` are sums over all workers.
    fn update(&self, processes: &[WorkerProcessStatus], running_threads: u32, total_threads: u32);
}

struct Tracked<S> {
    status: S,
    last_touched_generation: u64,
    reapable: bool,
}

trait Identified {
    fn identity(&self) -> &str;

    /// Takes the state of a later report; the name stays as first reported.
    fn refresh(&mut self, newer: Self);
}

impl Identified for WorkerProcessStatus {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn refresh(&mut self, newer: Self) {
        self.state = newer.state;
        self.total_threads = newer.total_threads;
        self.running_threads = newer.running_threads;
    }
}

impl Identified for AgentProcessStatus {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn refresh(&mut self, newer: Self) {
        self.state = newer.state;
    }
}

struct Table<S> {
    entries: Mutex<HashMap<String, Tracked<S>>>,
}

impl<S> Default for Table<S> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<S: Identified + Clone> Table<S> {
    fn set(&self, status: S, generation: u64) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        match entries.get_mut(status.identity()) {
            Some(tracked) => {
                tracked.status.refresh(status);
                tracked.last_touched_generation = generation;
                tracked.reapable = false;
            }
            None => {
                entries.insert(
                    status.identity().to_owned(),
                    Tracked {
                        status,
                        last_touched_generation: generation,
                        reapable: false,
                    },
                );
            }
        }
    }

    /// Purges marked entries, then marks those untouched since
    /// `last_event_generation`. Returns the number purged.
    fn flush(&self, last_event_generation: u64) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, tracked| !tracked.reapable);
        let purged = before.saturating_sub(entries.len());

        for tracked in entries.values_mut() {
            if tracked.last_touched_generation < last_event_generation {
                tracked.reapable = true;
            }
        }
        purged
    }

    fn snapshot(&self) -> Vec<S> {
        self.entries.lock().map_or_else(
            |_| Vec::new(),
            |entries| entries.values().map(|tracked| tracked.status.clone()).collect(),
        )
    }

    fn len(&self) -> usize {
        self.entries.lock().map_or(0, |entries| entries.len())
    }
}

/// Status of every known worker and agent.
pub struct ProcessStatusSet {
    workers: Table<WorkerProcessStatus>,
    agents: Table<AgentProcessStatus>,
    listeners: Mutex<Vec<Arc<dyn ProcessStatusListener>>>,
    new_data: AtomicBool,
    current_generation: AtomicU64,
    last_event_generation: AtomicU64,
}

impl Default for ProcessStatusSet {
    fn default() -> Self {
        Self {
            workers: Table::default(),
            agents: Table::default(),
            listeners: Mutex::new(Vec::new()),
            new_data: AtomicBool::new(false),
            current_generation: AtomicU64::new(1),
            last_event_generation: AtomicU64::new(0),
        }
    }
}

impl ProcessStatusSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn ProcessStatusListener>) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(listener);
        }
    }

    /// Records a control event; processes that do not report again before
    /// the second flush after this are forgotten.
    pub fn process_event(&self) {
        let generation = self
            .current_generation
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1);
        self.last_event_generation
            .store(generation, Ordering::Release);
        debug!("Process event opened generation {}", generation);
    }

    pub fn add_worker_status_report(&self, status: WorkerProcessStatus) {
        self.workers
            .set(status, self.current_generation.load(Ordering::Acquire));
        self.new_data.store(true, Ordering::Release);
    }

    pub fn add_agent_status_report(&self, status: AgentProcessStatus) {
        self.agents
            .set(status, self.current_generation.load(Ordering::Acquire));
        self.new_data.store(true, Ordering::Release);
    }

    /// Sorted worker snapshot.
    #[must_use]
    pub fn workers(&self) -> Vec<WorkerProcessStatus> {
        let mut processes = self.workers.snapshot();
        processes.sort_by(|left, right| {
            left.state
                .cmp(&right.state)
                .then_with(|| left.name.cmp(&right.name))
        });
        processes
    }

    /// Sorted agent snapshot.
    #[must_use]
    pub fn agents(&self) -> Vec<AgentProcessStatus> {
        let mut agents = self.agents.snapshot();
        agents.sort_by(|left, right| {
            left.state
                .cmp(&right.state)
                .then_with(|| left.name.cmp(&right.name))
        });
        agents
    }

    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Informs listeners if anything changed since the last update.
    pub(crate) fn update(&self) {
        if !self.new_data.swap(false, Ordering::AcqRel) {
            return;
        }

        let processes = self.workers();
        let (running, total) = processes.iter().fold((0_u32, 0_u32), |(running, total), p| {
            (
                running.saturating_add(u32::from(p.running_threads)),
                total.saturating_add(u32::from(p.total_threads)),
            )
        });

        let listeners = self
            .listeners
            .lock()
            .map(|listeners| listeners.clone())
            .unwrap_or_default();
        for listener in listeners {
            listener.update(&processes, running, total);
        }
    }

    pub(crate) fn flush(&self) {
        let last_event = self.last_event_generation.load(Ordering::Acquire);
        let purged = self
            .workers
            .flush(last_event)
            .saturating_add(self.agents.flush(last_event));
        if purged > 0 {
            debug!("Purged {} stale processes", purged);
            self.new_data.store(true, Ordering::Release);
        }
    }

    /// Runs [`update`](Self::update) every [`UPDATE_PERIOD`] and
    /// [`flush`](Self::flush) every [`FLUSH_PERIOD`] until the returned
    /// handle is dropped.
    #[must_use]
    pub fn spawn_housekeeping(self: &Arc<Self>) -> Housekeeping {
        let updater = {
            let set = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(UPDATE_PERIOD);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    set.update();
                }
            })
        };
        let flusher = {
            let set = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(FLUSH_PERIOD);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    set.flush();
                }
            })
        };
        info!(
            "Process status housekeeping every {:?} / {:?}",
            UPDATE_PERIOD, FLUSH_PERIOD
        );
        Housekeeping {
            tasks: vec![updater, flusher],
        }
    }
}

/// Owner of the periodic update and flush tasks.
pub struct Housekeeping {
    tasks: Vec<JoinHandle<()>>,
}

impl Housekeeping {
    pub fn stop(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for Housekeeping {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Feeds worker and agent status reports into a [`ProcessStatusSet`].
pub struct ProcessStatusHandler {
    status: Arc<ProcessStatusSet>,
}

impl ProcessStatusHandler {
    #[must_use]
    pub const fn new(status: Arc<ProcessStatusSet>) -> Self {
        Self { status }
    }
}

impl MessageHandler for ProcessStatusHandler {
    fn process(&self, message: &WireMessage) -> AppResult<bool> {
        match message {
            WireMessage::WorkerStatusReport(status) => {
                self.status.add_worker_status_report(status.clone());
                Ok(true)
            }
            WireMessage::AgentStatusReport(status) => {
                self.status.add_agent_status_report(status.clone());
                Ok(true)
            }
            WireMessage::ClearCache
            | WireMessage::DistributeFile(_)
            | WireMessage::InitialiseWorker(_)
            | WireMessage::Reset
            | WireMessage::Start(_)
            | WireMessage::Stop => Ok(false),
        }
    }
}

/// Listener that logs each snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusListener;

impl ProcessStatusListener for TracingStatusListener {
    fn update(&self, processes: &[WorkerProcessStatus], running_threads: u32, total_threads: u32) {
        info!(
            "{} worker processes, {}/{} threads running",
            processes.len(),
            running_threads,
            total_threads
        );
        for process in processes {
            debug!(
                "  {} [{}] {} {}/{}",
                process.name,
                process.identity,
                process.state.as_str(),
                process.running_threads,
                process.total_threads
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::ProcessState;
    use crate::error::{AppError, AppResult};

    #[derive(Default)]
    struct Captured {
        updates: Mutex<Vec<(Vec<String>, u32, u32)>>,
    }

    impl Captured {
        fn updates(&self) -> Vec<(Vec<String>, u32, u32)> {
            self.updates
                .lock()
                .map(|updates| updates.clone())
                .unwrap_or_default()
        }
    }

    impl ProcessStatusListener for Captured {
        fn update(&self, processes: &[WorkerProcessStatus], running: u32, total: u32) {
            let names = processes.iter().map(|p| p.name.clone()).collect();
            if let Ok(mut updates) = self.updates.lock() {
                updates.push((names, running, total));
            }
        }
    }

    fn worker(identity: &str, name: &str, state: ProcessState, running: u16) -> WorkerProcessStatus {
        WorkerProcessStatus {
            identity: identity.to_owned(),
            name: name.to_owned(),
            state,
            total_threads: 4,
            running_threads: running,
        }
    }

    fn names(set: &ProcessStatusSet) -> Vec<String> {
        set.workers().into_iter().map(|p| p.name).collect()
    }

    #[test]
    fn update_is_silent_without_new_data() {
        let set = ProcessStatusSet::new();
        let listener = Arc::new(Captured::default());
        set.add_listener(listener.clone());

        set.update();
        assert!(listener.updates().is_empty());
    }

    #[test]
    fn update_reports_sorted_snapshot_and_sums() -> AppResult<()> {
        let set = ProcessStatusSet::new();
        let listener = Arc::new(Captured::default());
        set.add_listener(listener.clone());

        set.add_worker_status_report(worker("w1", "zeta", ProcessState::Running, 3));
        set.add_worker_status_report(worker("w2", "alpha", ProcessState::Finished, 0));
        set.add_worker_status_report(worker("w3", "beta", ProcessState::Running, 1));
        set.update();
        set.update();

        let updates = listener.updates();
        let Some((names, running, total)) = updates.first() else {
            return Err(AppError::validation("Expected one update"));
        };
        if updates.len() != 1 {
            return Err(AppError::validation(format!(
                "Expected one update, saw {}",
                updates.len()
            )));
        }
        if names != &vec!["beta".to_owned(), "zeta".to_owned(), "alpha".to_owned()] {
            return Err(AppError::validation(format!("Unexpected order: {:?}", names)));
        }
        if (*running, *total) != (4, 12) {
            return Err(AppError::validation(format!(
                "Unexpected sums: {}/{}",
                running, total
            )));
        }
        Ok(())
    }

    #[test]
    fn reports_with_same_identity_replace_each_other() {
        let set = ProcessStatusSet::new();
        set.add_worker_status_report(worker("w1", "first", ProcessState::Started, 0));
        set.add_worker_status_report(worker("w1", "first", ProcessState::Running, 2));

        let workers = set.workers();
        assert_eq!(workers.len(), 1);
        assert_eq!(
            workers.first().map(|p| (p.state, p.running_threads)),
            Some((ProcessState::Running, 2))
        );
    }

    #[test]
    fn later_reports_keep_the_first_name() -> AppResult<()> {
        let set = ProcessStatusSet::new();
        set.add_worker_status_report(worker("w1", "original", ProcessState::Started, 0));
        set.add_worker_status_report(worker("w1", "renamed", ProcessState::Running, 3));

        let workers = set.workers();
        let Some(tracked) = workers.first() else {
            return Err(AppError::validation("Expected one tracked worker"));
        };
        if tracked.name != "original"
            || tracked.state != ProcessState::Running
            || tracked.running_threads != 3
        {
            return Err(AppError::validation(format!("Unexpected status {:?}", tracked)));
        }

        set.add_agent_status_report(AgentProcessStatus {
            identity: "a1".to_owned(),
            name: "agent-one".to_owned(),
            state: ProcessState::Started,
        });
        set.add_agent_status_report(AgentProcessStatus {
            identity: "a1".to_owned(),
            name: "agent-two".to_owned(),
            state: ProcessState::Finished,
        });
        let agents = set.agents();
        match agents.first() {
            Some(agent) if agent.name == "agent-one" && agent.state == ProcessState::Finished => {
                Ok(())
            }
            other => Err(AppError::validation(format!("Unexpected agent {:?}", other))),
        }
    }

    #[test]
    fn silent_processes_are_purged_on_second_flush_after_event() {
        let set = ProcessStatusSet::new();
        set.add_worker_status_report(worker("w1", "quiet", ProcessState::Running, 1));
        set.add_worker_status_report(worker("w2", "chatty", ProcessState::Running, 1));

        set.process_event();
        set.add_worker_status_report(worker("w2", "chatty", ProcessState::Running, 1));

        set.flush();
        assert_eq!(names(&set), vec!["chatty".to_owned(), "quiet".to_owned()]);

        set.flush();
        assert_eq!(names(&set), vec!["chatty".to_owned()]);
    }

    #[test]
    fn reporting_again_rescues_a_marked_process() {
        let set = ProcessStatusSet::new();
        set.add_worker_status_report(worker("w1", "late", ProcessState::Running, 1));
        set.process_event();
        set.flush();

        set.add_worker_status_report(worker("w1", "late", ProcessState::Running, 1));
        set.flush();
        set.flush();
        assert_eq!(names(&set), vec!["late".to_owned()]);
    }

    #[test]
    fn processes_survive_without_control_events() {
        let set = ProcessStatusSet::new();
        set.add_worker_status_report(worker("w1", "steady", ProcessState::Running, 1));
        for _ in 0..5 {
            set.flush();
        }
        assert_eq!(names(&set), vec!["steady".to_owned()]);
    }

    #[test]
    fn purge_triggers_an_update() {
        let set = ProcessStatusSet::new();
        let listener = Arc::new(Captured::default());
        set.add_listener(listener.clone());

        set.add_worker_status_report(worker("w1", "gone", ProcessState::Running, 1));
        set.update();
        set.process_event();
        set.flush();
        set.update();
        set.flush();
        set.update();

        let updates = listener.updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates.last(), Some(&(Vec::new(), 0, 0)));
    }

    #[test]
    fn status_handler_consumes_only_reports() -> AppResult<()> {
        let set = Arc::new(ProcessStatusSet::new());
        let handler = ProcessStatusHandler::new(set.clone());

        let report = WireMessage::WorkerStatusReport(worker("w1", "one", ProcessState::Started, 0));
        if !handler.process(&report)? {
            return Err(AppError::validation("Expected worker report to be consumed"));
        }
        if handler.process(&WireMessage::Stop)? {
            return Err(AppError::validation("Stop must not be consumed"));
        }
        if set.workers().len() != 1 {
            return Err(AppError::validation("Expected one tracked worker"));
        }
        Ok(())
    }

    #[test]
    fn agents_age_like_workers() {
        let set = ProcessStatusSet::new();
        set.add_agent_status_report(AgentProcessStatus {
            identity: "a1".to_owned(),
            name: "agent-one".to_owned(),
            state: ProcessState::Running,
        });
        assert_eq!(set.agent_count(), 1);

        set.process_event();
        set.flush();
        set.flush();
        assert_eq!(set.agent_count(), 0);
    }
}
