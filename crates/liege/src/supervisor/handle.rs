// ABOUTME: Coordinator-side record of each worker and the ordered registry of them.
// ABOUTME: Only the Supervisor mutates these; insertion order drives shutdown and reload.

use crate::link::LinkCommand;
use liege_core::{Message, WorkerId};
use std::fmt;
use tokio::sync::mpsc;

/// The coordinator's view of a worker's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Spawning,
    Ready,
    ShuttingDown,
    Exited,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Spawning => "spawning",
            WorkerState::Ready => "ready",
            WorkerState::ShuttingDown => "shutting down",
            WorkerState::Exited => "exited",
        };
        f.write_str(name)
    }
}

/// Snapshot of one registered worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStatus {
    pub id: WorkerId,
    pub state: WorkerState,
}

pub struct WorkerHandle {
    id: WorkerId,
    commands: mpsc::UnboundedSender<LinkCommand>,
    state: WorkerState,
}

impl WorkerHandle {
    pub fn new(id: WorkerId, commands: mpsc::UnboundedSender<LinkCommand>) -> Self {
        Self {
            id,
            commands,
            state: WorkerState::Spawning,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn set_state(&mut self, state: WorkerState) {
        self.state = state;
    }

    /// Queue a message for the worker. Returns false if its link is gone.
    pub fn send(&self, message: Message) -> bool {
        self.commands.send(LinkCommand::Deliver(message)).is_ok()
    }

    /// Ask the link to kill the process outright.
    pub fn kill(&self) -> bool {
        self.commands.send(LinkCommand::Kill).is_ok()
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            id: self.id,
            state: self.state,
        }
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}

/// Worker handles keyed by identity, kept in insertion order.
#[derive(Debug, Default)]
pub struct Registry {
    handles: Vec<WorkerHandle>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle. An identity already present is replaced in place.
    pub fn insert(&mut self, handle: WorkerHandle) {
        match self.handles.iter_mut().find(|h| h.id == handle.id) {
            Some(existing) => *existing = handle,
            None => self.handles.push(handle),
        }
    }

    pub fn get(&self, id: WorkerId) -> Option<&WorkerHandle> {
        self.handles.iter().find(|h| h.id == id)
    }

    pub fn get_mut(&mut self, id: WorkerId) -> Option<&mut WorkerHandle> {
        self.handles.iter_mut().find(|h| h.id == id)
    }

    pub fn remove(&mut self, id: WorkerId) -> Option<WorkerHandle> {
        let index = self.handles.iter().position(|h| h.id == id)?;
        Some(self.handles.remove(index))
    }

    pub fn contains(&self, id: WorkerId) -> bool {
        self.get(id).is_some()
    }

    /// Identities in insertion order, detached from the registry.
    pub fn snapshot(&self) -> Vec<WorkerId> {
        self.handles.iter().map(|h| h.id).collect()
    }

    pub fn statuses(&self) -> Vec<WorkerStatus> {
        self.handles.iter().map(WorkerHandle::status).collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: u32) -> (WorkerHandle, mpsc::UnboundedReceiver<LinkCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (WorkerHandle::new(WorkerId(id), tx), rx)
    }

    #[test]
    fn test_new_handle_is_spawning() {
        let (h, _rx) = handle(1);
        assert_eq!(h.state(), WorkerState::Spawning);
    }

    #[test]
    fn test_snapshot_keeps_insertion_order() {
        let mut registry = Registry::new();
        for id in [30, 10, 20] {
            registry.insert(handle(id).0);
        }

        assert_eq!(
            registry.snapshot(),
            vec![WorkerId(30), WorkerId(10), WorkerId(20)]
        );

        registry.remove(WorkerId(10));
        assert_eq!(registry.snapshot(), vec![WorkerId(30), WorkerId(20)]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_insert_same_identity_replaces() {
        let mut registry = Registry::new();
        registry.insert(handle(1).0);
        registry.insert(handle(2).0);

        let (mut replacement, _rx) = handle(1);
        replacement.set_state(WorkerState::Ready);
        registry.insert(replacement);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.snapshot(), vec![WorkerId(1), WorkerId(2)]);
        assert_eq!(registry.get(WorkerId(1)).unwrap().state(), WorkerState::Ready);
    }

    #[test]
    fn test_remove_missing_is_none() {
        let mut registry = Registry::new();
        assert!(registry.remove(WorkerId(9)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_send_and_kill_reach_link() {
        let (h, mut rx) = handle(4);

        assert!(h.send(Message::Shutdown));
        assert!(h.kill());

        assert_eq!(rx.try_recv().unwrap(), LinkCommand::Deliver(Message::Shutdown));
        assert_eq!(rx.try_recv().unwrap(), LinkCommand::Kill);
    }

    #[test]
    fn test_send_after_link_closed() {
        let (h, rx) = handle(4);
        drop(rx);
        assert!(!h.send(Message::Shutdown));
    }
}
