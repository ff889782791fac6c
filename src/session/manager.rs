use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};

use super::protocol::ServerMessage;
use crate::domain::{
    BoardEvent, BoardId, ColumnId, CommittedMove, DragPhase, DragSignal, Identity, PresenceChange,
    PresenceChanged, SessionId, TaskId, UserId,
};
use crate::error::{CardflowError, Result};

struct SessionHandle {
    identity: Identity,
    tx: mpsc::Sender<ServerMessage>,
    boards: HashSet<BoardId>,
}

/// Advisory marker that someone is dragging a card
#[derive(Debug, Clone)]
struct DragLock {
    session_id: SessionId,
    user_id: UserId,
    target_column: Option<ColumnId>,
    last_signal: Instant,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, SessionHandle>,
    boards: HashMap<BoardId, HashSet<SessionId>>,
    locks: HashMap<(BoardId, TaskId), DragLock>,
}

impl Registry {
    /// Queue `msg` for every subscriber of `board` except `skip`.
    /// Returns sessions whose receiver is gone.
    fn deliver(&self, board: &BoardId, skip: Option<SessionId>, msg: &ServerMessage) -> Vec<SessionId> {
        let Some(subscribers) = self.boards.get(board) else {
            return Vec::new();
        };

        let mut closed = Vec::new();
        for session_id in subscribers.iter().filter(|id| Some(**id) != skip) {
            let Some(handle) = self.sessions.get(session_id) else {
                continue;
            };
            match handle.tx.try_send(msg.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let err = CardflowError::Transport(format!("outbound queue full for {}", session_id));
                    warn!(session = %session_id, error = %err, "dropping message for slow session");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*session_id),
            }
        }
        closed
    }

    fn present_users(&self, board: &BoardId) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .boards
            .get(board)
            .into_iter()
            .flatten()
            .filter_map(|id| self.sessions.get(id))
            .map(|handle| handle.identity.user_id.clone())
            .collect();
        users.sort();
        users.dedup();
        users
    }

    fn presence(&self, board: &BoardId, session_id: SessionId, identity: &Identity, change: PresenceChange) -> ServerMessage {
        ServerMessage::Event(BoardEvent::PresenceChanged(PresenceChanged {
            board_id: board.clone(),
            session_id,
            user_id: identity.user_id.clone(),
            display_name: identity.display_name.clone(),
            change,
            present_users: self.present_users(board),
        }))
    }

    /// Drop every lock `session_id` holds on `board`, telling the others.
    fn release_locks(&mut self, board: &BoardId, session_id: SessionId) -> Vec<SessionId> {
        let held: Vec<(BoardId, TaskId)> = self
            .locks
            .iter()
            .filter(|((b, _), lock)| b == board && lock.session_id == session_id)
            .map(|(key, _)| key.clone())
            .collect();

        let mut closed = Vec::new();
        for key in held {
            if let Some(lock) = self.locks.remove(&key) {
                debug!(board = %key.0, task = %key.1, session = %session_id, "releasing drag lock");
                closed.extend(self.deliver(board, Some(session_id), &implicit_end(&key, &lock)));
            }
        }
        closed
    }

    fn leave_board(&mut self, board: &BoardId, session_id: SessionId, identity: &Identity) -> Vec<SessionId> {
        let mut closed = self.release_locks(board, session_id);

        let now_empty = match self.boards.get_mut(board) {
            Some(subscribers) => {
                subscribers.remove(&session_id);
                subscribers.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.boards.remove(board);
        }

        let msg = self.presence(board, session_id, identity, PresenceChange::Left);
        closed.extend(self.deliver(board, None, &msg));
        closed
    }

    fn disconnect(&mut self, session_id: SessionId) -> Vec<SessionId> {
        let Some(handle) = self.sessions.remove(&session_id) else {
            return Vec::new();
        };

        let mut closed = Vec::new();
        for board in &handle.boards {
            closed.extend(self.leave_board(board, session_id, &handle.identity));
        }
        info!(session = %session_id, user = %handle.identity.user_id, "session disconnected");
        closed
    }
}

fn implicit_end(key: &(BoardId, TaskId), lock: &DragLock) -> ServerMessage {
    ServerMessage::Event(BoardEvent::DragSignalRelayed(DragSignal {
        task_id: key.1.clone(),
        board_id: key.0.clone(),
        phase: DragPhase::End,
        user_id: Some(lock.user_id.clone()),
        target_column: lock.target_column.clone(),
        implicit: true,
    }))
}

/// Tracks connected sessions, which boards they watch and who is dragging what.
pub struct SessionManager {
    registry: RwLock<Registry>,
    buffer: usize,
}

impl SessionManager {
    /// `buffer` is the outbound queue depth per session
    pub fn new(buffer: usize) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            buffer: buffer.max(1),
        }
    }

    /// Register a new session. The receiver yields everything addressed to it.
    pub async fn connect(&self, identity: Identity) -> (SessionId, mpsc::Receiver<ServerMessage>) {
        let session_id = SessionId::new();
        let (tx, rx) = mpsc::channel(self.buffer);

        // Fresh channel, cannot be full.
        let _ = tx.try_send(ServerMessage::Welcome {
            session_id,
            user_id: identity.user_id.clone(),
        });

        info!(session = %session_id, user = %identity.user_id, "session connected");
        self.registry.write().await.sessions.insert(
            session_id,
            SessionHandle {
                identity,
                tx,
                boards: HashSet::new(),
            },
        );
        (session_id, rx)
    }

    /// Subscribe a session to a board and announce it to the others.
    pub async fn join(&self, session_id: SessionId, board: &BoardId) -> Result<()> {
        let closed = {
            let mut registry = self.registry.write().await;
            let handle = registry
                .sessions
                .get_mut(&session_id)
                .ok_or_else(|| CardflowError::NotFound(format!("session {}", session_id)))?;
            if !handle.boards.insert(board.clone()) {
                return Ok(());
            }
            let identity = handle.identity.clone();

            registry
                .boards
                .entry(board.clone())
                .or_default()
                .insert(session_id);
            debug!(session = %session_id, board = %board, "joined board");

            let msg = registry.presence(board, session_id, &identity, PresenceChange::Joined);
            registry.deliver(board, Some(session_id), &msg)
        };
        self.reap(closed).await;
        Ok(())
    }

    pub async fn leave(&self, session_id: SessionId, board: &BoardId) -> Result<()> {
        let closed = {
            let mut registry = self.registry.write().await;
            let handle = registry
                .sessions
                .get_mut(&session_id)
                .ok_or_else(|| CardflowError::NotFound(format!("session {}", session_id)))?;
            if !handle.boards.remove(board) {
                return Ok(());
            }
            let identity = handle.identity.clone();
            registry.leave_board(board, session_id, &identity)
        };
        self.reap(closed).await;
        Ok(())
    }

    /// Stamp a drag signal with the sender's identity and relay it to
    /// everyone else on the board.
    pub async fn relay_drag_signal(&self, session_id: SessionId, mut signal: DragSignal) -> Result<()> {
        let closed = {
            let mut registry = self.registry.write().await;
            let handle = registry
                .sessions
                .get(&session_id)
                .ok_or_else(|| CardflowError::NotFound(format!("session {}", session_id)))?;
            if !handle.boards.contains(&signal.board_id) {
                return Err(CardflowError::Validation(format!(
                    "session has not joined board {}",
                    signal.board_id
                )));
            }

            let user_id = handle.identity.user_id.clone();
            signal.user_id = Some(user_id.clone());
            signal.implicit = false;

            let key = (signal.board_id.clone(), signal.task_id.clone());
            match signal.phase {
                DragPhase::Start | DragPhase::Update => {
                    if let Some(previous) = registry.locks.get(&key) {
                        if previous.session_id != session_id {
                            debug!(task = %signal.task_id, holder = %previous.user_id, "drag lock taken over");
                        }
                    }
                    registry.locks.insert(
                        key,
                        DragLock {
                            session_id,
                            user_id,
                            target_column: signal.target_column.clone(),
                            last_signal: Instant::now(),
                        },
                    );
                }
                DragPhase::End => {
                    if registry
                        .locks
                        .get(&key)
                        .is_some_and(|lock| lock.session_id == session_id)
                    {
                        registry.locks.remove(&key);
                    }
                }
            }

            let board = signal.board_id.clone();
            let msg = ServerMessage::Event(BoardEvent::DragSignalRelayed(signal));
            registry.deliver(&board, Some(session_id), &msg)
        };
        self.reap(closed).await;
        Ok(())
    }

    /// Deliver a committed move to every subscriber of its board, the mover
    /// included.
    pub async fn broadcast_committed_move(&self, event: &CommittedMove) -> usize {
        self.broadcast(BoardEvent::CommittedMove(event.clone())).await
    }

    /// Deliver an event to every subscriber of its board. Returns how many
    /// sessions it was queued for.
    pub async fn broadcast(&self, event: BoardEvent) -> usize {
        let board = event.board_id().clone();
        let (delivered, closed) = {
            let mut registry = self.registry.write().await;
            if let BoardEvent::CommittedMove(ref moved) = event {
                registry.locks.remove(&(board.clone(), moved.task_id.clone()));
            }
            let subscribers = registry.boards.get(&board).map_or(0, |s| s.len());
            let closed = registry.deliver(&board, None, &ServerMessage::Event(event));
            (subscribers - closed.len(), closed)
        };
        self.reap(closed).await;
        delivered
    }

    /// Queue a message for one session. False when the session is gone.
    pub async fn send_to(&self, session_id: SessionId, msg: ServerMessage) -> bool {
        let result = {
            let registry = self.registry.read().await;
            match registry.sessions.get(&session_id) {
                Some(handle) => handle.tx.try_send(msg),
                None => return false,
            }
        };
        match result {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session = %session_id, "outbound queue full, reply dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.reap(vec![session_id]).await;
                false
            }
        }
    }

    /// Forget a session: release its drag locks and tell the boards it left.
    pub async fn disconnect(&self, session_id: SessionId) {
        self.reap(vec![session_id]).await;
    }

    /// Release drag locks with no signal for `ttl`.
    pub async fn sweep_stale_locks(&self, ttl: Duration) -> usize {
        self.sweep_stale_locks_at(ttl, Instant::now()).await
    }

    async fn sweep_stale_locks_at(&self, ttl: Duration, now: Instant) -> usize {
        let (released, closed) = {
            let mut registry = self.registry.write().await;
            let expired: Vec<(BoardId, TaskId)> = registry
                .locks
                .iter()
                .filter(|(_, lock)| now.saturating_duration_since(lock.last_signal) >= ttl)
                .map(|(key, _)| key.clone())
                .collect();

            let mut closed = Vec::new();
            for key in &expired {
                if let Some(lock) = registry.locks.remove(key) {
                    warn!(board = %key.0, task = %key.1, user = %lock.user_id, "stale drag lock released");
                    closed.extend(registry.deliver(&key.0, Some(lock.session_id), &implicit_end(key, &lock)));
                }
            }
            (expired.len(), closed)
        };
        self.reap(closed).await;
        released
    }

    /// Forward committed events from the publisher until it shuts down.
    pub async fn run_relay(self: Arc<Self>, mut rx: broadcast::Receiver<BoardEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let delivered = self.broadcast(event).await;
                    debug!(delivered, "relayed board event");
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event relay lagged, skipped {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Event relay stopped");
                    break;
                }
            }
        }
    }

    pub async fn session_count(&self) -> usize {
        self.registry.read().await.sessions.len()
    }

    pub async fn present_users(&self, board: &BoardId) -> Vec<UserId> {
        self.registry.read().await.present_users(board)
    }

    /// Tasks currently being dragged on a board, and by whom
    pub async fn drag_locks(&self, board: &BoardId) -> Vec<(TaskId, UserId)> {
        let registry = self.registry.read().await;
        let mut locks: Vec<(TaskId, UserId)> = registry
            .locks
            .iter()
            .filter(|((b, _), _)| b == board)
            .map(|((_, task), lock)| (task.clone(), lock.user_id.clone()))
            .collect();
        locks.sort();
        locks
    }

    /// Disconnect sessions whose receivers are gone, and any that vanish
    /// while telling the others about it.
    async fn reap(&self, mut closed: Vec<SessionId>) {
        while !closed.is_empty() {
            let mut registry = self.registry.write().await;
            let mut next = Vec::new();
            for session_id in closed.drain(..) {
                next.extend(registry.disconnect(session_id));
            }
            drop(registry);
            closed = next;
        }
    }
}
