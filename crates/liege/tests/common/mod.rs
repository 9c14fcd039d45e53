// ABOUTME: In-memory spawner for supervisor tests.
// ABOUTME: Each fake worker runs the real Agent over duplex pipes inside a task.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::FutureExt;
use liege::link;
use liege::{
    Agent, AgentOptions, ExitStatus, Instance, SpawnError, Spawner, WorkerId, WorkerLink,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::AbortHandle;

/// How the next spawned fake worker's unit behaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Behavior {
    #[default]
    Healthy,
    FailStart,
    FailStop,
    NeverReady,
    HangOnStop,
}

/// What happened, in order, across all fake workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Spawn(WorkerId),
    Stop(WorkerId),
}

#[derive(Default)]
struct Inner {
    next_id: AtomicU32,
    behaviors: Mutex<VecDeque<Behavior>>,
    journal: Mutex<Vec<Entry>>,
    tasks: Mutex<HashMap<WorkerId, AbortHandle>>,
}

#[derive(Clone, Default)]
pub struct FakeSpawner {
    inner: Arc<Inner>,
}

impl FakeSpawner {
    pub fn new() -> Self {
        let spawner = Self::default();
        spawner.inner.next_id.store(1000, Ordering::SeqCst);
        spawner
    }

    /// Behaviors for the next spawns, in order. Later spawns are healthy.
    pub fn with_behaviors(self, behaviors: impl IntoIterator<Item = Behavior>) -> Self {
        self.inner.behaviors.lock().unwrap().extend(behaviors);
        self
    }

    pub fn journal(&self) -> Vec<Entry> {
        self.inner.journal.lock().unwrap().clone()
    }

    pub fn spawns(&self) -> usize {
        self.journal()
            .iter()
            .filter(|e| matches!(e, Entry::Spawn(_)))
            .count()
    }

    pub fn stops_of(&self, id: WorkerId) -> usize {
        self.journal()
            .iter()
            .filter(|e| **e == Entry::Stop(id))
            .count()
    }

    /// Kill a worker outside of any protocol exchange.
    pub fn crash(&self, id: WorkerId) {
        if let Some(task) = self.inner.tasks.lock().unwrap().get(&id) {
            task.abort();
        }
    }

    fn record(&self, entry: Entry) {
        self.inner.journal.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl Spawner for FakeSpawner {
    async fn spawn(&self) -> Result<WorkerLink, SpawnError> {
        let id = WorkerId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let behavior = self
            .inner
            .behaviors
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        self.record(Entry::Spawn(id));

        let (coordinator, worker) = tokio::io::duplex(1024);
        let (coord_read, coord_write) = tokio::io::split(coordinator);
        let (agent_read, agent_write) = tokio::io::split(worker);

        let unit = FakeUnit {
            id,
            behavior,
            spawner: self.clone(),
        };
        let mut agent = Agent::new(
            unit,
            AgentOptions {
                orphan_poll: Duration::from_secs(3600),
                handle_signals: false,
            },
        )
        .with_parent_probe(|| 4242);

        let task = tokio::spawn(async move { agent.run(agent_read, agent_write).await.code() });
        let abort = task.abort_handle();
        self.inner
            .tasks
            .lock()
            .unwrap()
            .insert(id, task.abort_handle());

        let exit = async move {
            match task.await {
                Ok(code) => ExitStatus::Exited(code),
                Err(_) => ExitStatus::Signaled(9),
            }
        }
        .boxed();

        Ok(link::attach(
            id,
            coord_read,
            coord_write,
            exit,
            Box::new(move || abort.abort()),
        ))
    }
}

struct FakeUnit {
    id: WorkerId,
    behavior: Behavior,
    spawner: FakeSpawner,
}

#[async_trait]
impl Instance for FakeUnit {
    async fn start(&mut self) -> anyhow::Result<()> {
        match self.behavior {
            Behavior::FailStart => anyhow::bail!("unit {} refused to start", self.id),
            Behavior::NeverReady => std::future::pending().await,
            _ => Ok(()),
        }
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.spawner.record(Entry::Stop(self.id));
        match self.behavior {
            Behavior::FailStop => anyhow::bail!("unit {} failed to stop", self.id),
            Behavior::HangOnStop => std::future::pending().await,
            _ => Ok(()),
        }
    }
}
