// apps/kernel-server/src/hub.rs
// Purpose: The single control flow that owns all per-task state,
// serializes every mutation, and fans out committed actions.
// Architecture: Domain Service (single-writer serializer)
// Dependencies: tokio (mpsc/oneshot), the action and storage layers

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::action::CommittedTaskAction;
use crate::error::SyncError;
use crate::models::TaskData;
use crate::observability::HubMetrics;
use crate::storage::{self, Storage};
use crate::wire;

const REGISTER_CHANNEL_CAPACITY: usize = 32;
const UNREGISTER_CHANNEL_CAPACITY: usize = 32;
const EXEC_CHANNEL_CAPACITY: usize = 256;

/// A session's registration with the hub: its identifiers and the
/// channel the hub uses to hand it committed task actions. Cloned into
/// two maps (`sessions`, `sessionsByTask`); both clones must be dropped
/// before `outbound` closes and the writer pump sees end-of-stream.
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub task_id: String,
    pub project_name: String,
    pub outbound: mpsc::Sender<CommittedTaskAction>,
}

pub struct RegisterMsg {
    pub handle: SessionHandle,
    pub ack: oneshot::Sender<Result<(), SyncError>>,
}

#[derive(Clone)]
pub struct MetricsHandle {
    actions_applied: Arc<AtomicU64>,
    actions_rejected: Arc<AtomicU64>,
    active_sessions: Arc<AtomicUsize>,
    active_tasks: Arc<AtomicUsize>,
}

impl MetricsHandle {
    fn new() -> Self {
        Self {
            actions_applied: Arc::new(AtomicU64::new(0)),
            actions_rejected: Arc::new(AtomicU64::new(0)),
            active_sessions: Arc::new(AtomicUsize::new(0)),
            active_tasks: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn inc_applied(&self) {
        self.actions_applied.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_rejected(&self) {
        self.actions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    fn set_active_sessions(&self, n: usize) {
        self.active_sessions.store(n, Ordering::Relaxed);
    }

    fn set_active_tasks(&self, n: usize) {
        self.active_tasks.store(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HubMetrics {
        HubMetrics {
            actions_applied: self.actions_applied.load(Ordering::Relaxed),
            actions_rejected: self.actions_rejected.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone)]
pub struct HubHandle {
    pub register_tx: mpsc::Sender<RegisterMsg>,
    pub unregister_tx: mpsc::Sender<Uuid>,
    pub exec_tx: mpsc::Sender<CommittedTaskAction>,
    pub metrics: MetricsHandle,
}

struct Hub {
    sessions: HashMap<String, SessionHandle>,
    sessions_by_task: HashMap<String, HashMap<String, SessionHandle>>,
    actions_by_task: HashMap<String, Vec<CommittedTaskAction>>,
    states_by_task: HashMap<String, TaskData>,
    register_rx: mpsc::Receiver<RegisterMsg>,
    unregister_rx: mpsc::Receiver<Uuid>,
    exec_rx: mpsc::Receiver<CommittedTaskAction>,
    storage: Arc<dyn Storage>,
    save_frequency: usize,
    metrics: MetricsHandle,
}

pub fn spawn(storage: Arc<dyn Storage>, save_frequency: usize) -> HubHandle {
    let (register_tx, register_rx) = mpsc::channel(REGISTER_CHANNEL_CAPACITY);
    let (unregister_tx, unregister_rx) = mpsc::channel(UNREGISTER_CHANNEL_CAPACITY);
    let (exec_tx, exec_rx) = mpsc::channel(EXEC_CHANNEL_CAPACITY);
    let metrics = MetricsHandle::new();

    let hub = Hub {
        sessions: HashMap::new(),
        sessions_by_task: HashMap::new(),
        actions_by_task: HashMap::new(),
        states_by_task: HashMap::new(),
        register_rx,
        unregister_rx,
        exec_rx,
        storage,
        save_frequency: save_frequency.max(1),
        metrics: metrics.clone(),
    };
    tokio::spawn(hub.run());

    HubHandle {
        register_tx,
        unregister_tx,
        exec_tx,
        metrics,
    }
}

impl Hub {
    async fn run(mut self) {
        tracing::info!("hub loop starting");
        loop {
            tokio::select! {
                msg = self.register_rx.recv() => {
                    match msg {
                        Some(msg) => self.handle_register(msg).await,
                        None => break,
                    }
                }
                session_id = self.unregister_rx.recv() => {
                    match session_id {
                        Some(session_id) => self.handle_unregister(session_id).await,
                        None => break,
                    }
                }
                action = self.exec_rx.recv() => {
                    match action {
                        Some(action) => self.handle_exec(action).await,
                        None => break,
                    }
                }
            }
        }
        tracing::info!("hub loop exiting: all channels closed");
    }

    /// On register: load the task's state the first time it's seen,
    /// rejecting only the registering session (via `ack`) if the load
    /// fails — see SPEC_FULL.md §4.3 for why this doesn't take down
    /// the whole hub.
    async fn handle_register(&mut self, msg: RegisterMsg) {
        let RegisterMsg { handle, ack } = msg;
        let task_id = handle.task_id.clone();
        let session_key = handle.session_id.to_string();

        if !self.sessions_by_task.contains_key(&task_id) {
            match self.storage.load_task_data(&handle.project_name, &task_id).await {
                Ok(state) => {
                    self.sessions_by_task.insert(task_id.clone(), HashMap::new());
                    self.actions_by_task.insert(task_id.clone(), Vec::new());
                    self.states_by_task.insert(task_id.clone(), state);
                }
                Err(e) => {
                    tracing::error!(
                        task_id = %task_id,
                        project_name = %handle.project_name,
                        error = %e,
                        "task load failed; rejecting this registration only"
                    );
                    let _ = ack.send(Err(e));
                    return;
                }
            }
        }

        self.sessions_by_task
            .get_mut(&task_id)
            .expect("just ensured above")
            .insert(session_key.clone(), handle.clone());
        self.sessions.insert(session_key, handle);

        self.metrics.set_active_sessions(self.sessions.len());
        self.metrics.set_active_tasks(self.sessions_by_task.len());
        tracing::debug!(%task_id, "session registered");

        let _ = ack.send(Ok(()));
    }

    /// On unregister: drop both clones of the session's outbound
    /// sender (one here, one in `sessionsByTask`) so the writer pump
    /// observes channel closure; save and evict the task once its last
    /// session leaves.
    async fn handle_unregister(&mut self, session_id: Uuid) {
        let session_key = session_id.to_string();
        let Some(handle) = self.sessions.remove(&session_key) else {
            return;
        };
        let task_id = handle.task_id.clone();

        if let Some(per_task) = self.sessions_by_task.get_mut(&task_id) {
            per_task.remove(&session_key);
            if per_task.is_empty() {
                self.sessions_by_task.remove(&task_id);
                if let Some(state) = self.states_by_task.remove(&task_id) {
                    self.save_state(&task_id, &state, "eviction").await;
                }
            }
        }

        self.metrics.set_active_sessions(self.sessions.len());
        self.metrics.set_active_tasks(self.sessions_by_task.len());
        tracing::debug!(%task_id, "session unregistered");
    }

    /// On execAction: stamp, apply, append, save on cadence, broadcast.
    /// The order (apply, then append, then decide whether to save) is
    /// the one the cadence check ("after the append") in SPEC_FULL.md
    /// §4.3 actually requires.
    async fn handle_exec(&mut self, mut action: CommittedTaskAction) {
        action.base.time = wire::now_string();

        let Some(session) = self.sessions.get(&action.base.session_id) else {
            tracing::warn!(session_id = %action.base.session_id, "execAction for unknown session; dropping");
            self.metrics.inc_rejected();
            return;
        };
        let task_id = session.task_id.clone();

        let Some(state) = self.states_by_task.get(&task_id) else {
            tracing::warn!(%task_id, "execAction for task with no loaded state; dropping");
            self.metrics.inc_rejected();
            return;
        };

        let new_state = match action.apply(state) {
            Ok(new_state) => new_state,
            Err(e) => {
                tracing::warn!(
                    %task_id,
                    action_type = %action.base.action_type,
                    error = %e,
                    "action rejected"
                );
                self.metrics.inc_rejected();
                return;
            }
        };

        self.states_by_task.insert(task_id.clone(), new_state.clone());

        let log = self.actions_by_task.entry(task_id.clone()).or_default();
        log.push(action.clone());
        let should_save = log.len() % self.save_frequency == 0;

        if should_save {
            self.save_state(&task_id, &new_state, "cadence").await;
        }

        self.metrics.inc_applied();

        if let Some(per_task) = self.sessions_by_task.get(&task_id) {
            for target in per_task.values() {
                if target.outbound.send(action.clone()).await.is_err() {
                    tracing::debug!(
                        session_id = %target.session_id,
                        %task_id,
                        "outbound channel already closed; session will unregister on its own"
                    );
                }
            }
        }
    }

    /// A failing save here is a process-fatal condition: the core's
    /// obligation is to surface data loss unambiguously, not to choose
    /// the operator's recovery policy. See SPEC_FULL.md §7.
    async fn save_state(&self, task_id: &str, state: &TaskData, reason: &str) {
        let submit_time = wire::now_millis();
        let key = storage::task_key(&state.config.project_name, &state.config.task_id, submit_time);
        match self.storage.save(&key, state).await {
            Ok(()) => tracing::info!(%task_id, %key, %reason, "task state saved"),
            Err(e) => {
                tracing::error!(%task_id, %key, %reason, error = %e, "task save failed; this is a process-fatal condition");
                std::process::exit(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemData, TaskConfig, TaskStatus};
    use crate::storage::InMemoryStorage;
    use std::time::Duration;
    use tokio::time::timeout;

    fn task_data(project_name: &str, task_id: &str) -> TaskData {
        TaskData {
            config: Arc::new(TaskConfig {
                project_name: project_name.to_string(),
                task_id: task_id.to_string(),
                item_type: "box2d".to_string(),
                extra: serde_json::Value::Null,
            }),
            status: TaskStatus::default(),
            items: vec![Arc::new(ItemData {
                id: 0,
                index: 0,
                url: "image0.jpg".into(),
                labels: HashMap::new(),
                shapes: HashMap::new(),
            })],
            tracks: Arc::new(HashMap::new()),
        }
    }

    async fn register(hub: &HubHandle, project_name: &str, task_id: &str) -> (Uuid, mpsc::Receiver<CommittedTaskAction>) {
        let session_id = Uuid::new_v4();
        let (outbound_tx, outbound_rx) = mpsc::channel(8);
        let handle = SessionHandle {
            session_id,
            task_id: task_id.to_string(),
            project_name: project_name.to_string(),
            outbound: outbound_tx,
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        hub.register_tx.send(RegisterMsg { handle, ack: ack_tx }).await.unwrap();
        ack_rx.await.unwrap().expect("registration should succeed");
        (session_id, outbound_rx)
    }

    fn add_label_action(session_id: Uuid) -> CommittedTaskAction {
        use crate::action::{AddLabelAction, GenericAction, TaskActionPayload};
        use crate::models::{LabelData, ShapeRect};

        CommittedTaskAction {
            base: GenericAction {
                action_type: "ADD_LABEL".to_string(),
                session_id: session_id.to_string(),
                time: String::new(),
            },
            payload: TaskActionPayload::AddLabel(AddLabelAction {
                item_index: 0,
                label: LabelData::default(),
                shapes: vec![ShapeRect { x1: 0.0, y1: 0.0, x2: 1.0, y2: 1.0 }],
            }),
        }
    }

    // S3/S4-flavored: two sessions on the same task both see a
    // broadcast; registration counts add up across tasks.
    #[tokio::test]
    async fn two_sessions_one_task_both_receive_broadcast() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.seed("proj", "T", task_data("proj", "T"));
        let hub = spawn(storage, 5);

        let (session_a, mut rx_a) = register(&hub, "proj", "T").await;
        let (_session_b, mut rx_b) = register(&hub, "proj", "T").await;

        hub.exec_tx.send(add_label_action(session_a)).await.unwrap();

        let a_got = timeout(Duration::from_secs(1), rx_a.recv()).await.unwrap();
        let b_got = timeout(Duration::from_secs(1), rx_b.recv()).await.unwrap();
        assert!(a_got.is_some(), "originating session must receive its own committed action");
        assert!(b_got.is_some(), "co-session on the same task must receive the broadcast");
    }

    // S4: cross-task isolation.
    #[tokio::test]
    async fn cross_task_sessions_do_not_see_each_others_broadcasts() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.seed("proj", "T1", task_data("proj", "T1"));
        storage.seed("proj", "T2", task_data("proj", "T2"));
        let hub = spawn(storage, 5);

        let (session_a, mut rx_a) = register(&hub, "proj", "T1").await;
        let (_session_b, mut rx_b) = register(&hub, "proj", "T2").await;

        hub.exec_tx.send(add_label_action(session_a)).await.unwrap();

        let a_got = timeout(Duration::from_secs(1), rx_a.recv()).await.unwrap();
        assert!(a_got.is_some());

        let b_got = timeout(Duration::from_millis(200), rx_b.recv()).await;
        assert!(b_got.is_err(), "session on a different task must not receive anything within the window");
    }

    // S5: last-unregister save.
    #[tokio::test]
    async fn last_unregister_saves_and_evicts_state() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.seed("proj", "T", task_data("proj", "T"));
        let hub = spawn(Arc::clone(&storage) as Arc<dyn Storage>, 5);

        let (session_a, _rx_a) = register(&hub, "proj", "T").await;
        hub.exec_tx.send(add_label_action(session_a)).await.unwrap();

        // give the hub a moment to apply before we unregister
        tokio::time::sleep(Duration::from_millis(20)).await;

        hub.unregister_tx.send(session_a).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(storage.save_count(), 1, "the only session leaving must trigger exactly one save");
    }

    #[tokio::test]
    async fn registration_failure_rejects_only_that_session() {
        let storage = Arc::new(InMemoryStorage::new());
        // Deliberately do not seed "proj"/"missing".
        let hub = spawn(storage, 5);

        let session_id = Uuid::new_v4();
        let (outbound_tx, _outbound_rx) = mpsc::channel(8);
        let handle = SessionHandle {
            session_id,
            task_id: "missing".to_string(),
            project_name: "proj".to_string(),
            outbound: outbound_tx,
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        hub.register_tx.send(RegisterMsg { handle, ack: ack_tx }).await.unwrap();
        let result = ack_rx.await.unwrap();
        assert!(matches!(result, Err(SyncError::LoaderMissing { .. })));
    }
}
