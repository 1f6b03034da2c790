//! Cyclic polling groups.
//!
//! One background worker per named group, talking only through the
//! gateway's locked operations. Constraints:
//! - a worker never blocks its creator: `start` spawns and returns;
//! - `stop` takes effect within one wait boundary and is bounded by a
//!   1 s join timeout;
//! - an offline transport skips the whole cycle, a failing member never
//!   aborts the rest of the cycle;
//! - cadence tracks the configured interval regardless of read latency.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::gateway::Gateway;

const RETRY_SPACING: Duration = Duration::from_millis(50);
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct GroupConfig {
    pub name: String,
    pub var_names: Vec<String>,
    pub interval: Duration,
    /// 0 = run forever.
    pub max_cycles: u32,
    pub per_read_retries: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupState {
    Idle,
    Running,
    Stopped,
}

struct Worker {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

struct GroupInner {
    config: GroupConfig,
    gateway: Arc<Gateway>,
    state: Mutex<GroupState>,
    worker: Mutex<Option<Worker>>,
}

#[derive(Clone)]
pub struct GroupHandle {
    inner: Arc<GroupInner>,
}

impl GroupHandle {
    fn new(config: GroupConfig, gateway: Arc<Gateway>) -> GroupHandle {
        GroupHandle {
            inner: Arc::new(GroupInner {
                config,
                gateway,
                state: Mutex::new(GroupState::Idle),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn state(&self) -> GroupState {
        *self.inner.state.lock()
    }

    /// Spawn the worker. Only an `Idle` group starts; a stopped group
    /// stays stopped.
    pub fn start(&self) {
        let mut state = self.inner.state.lock();
        if *state != GroupState::Idle {
            return;
        }
        *state = GroupState::Running;
        drop(state);

        let (stop_tx, stop_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let join = tokio::spawn(run_group(inner, stop_rx));
        *self.inner.worker.lock() = Some(Worker { stop_tx, join });
        debug!(
            "poll group '{}' started ({} vars, interval {:?})",
            self.inner.config.name,
            self.inner.config.var_names.len(),
            self.inner.config.interval
        );
    }

    /// Signal the worker and wait for it, bounded by a 1 s timeout. Safe
    /// to call from outside the worker; an in-flight read is not
    /// interrupted, the stop is observed at the next wait boundary.
    pub async fn stop(&self) -> bool {
        let worker = self.inner.worker.lock().take();
        let Some(worker) = worker else {
            *self.inner.state.lock() = GroupState::Stopped;
            return true;
        };

        let _ = worker.stop_tx.send(true);
        let joined = tokio::time::timeout(STOP_JOIN_TIMEOUT, worker.join)
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);
        *self.inner.state.lock() = GroupState::Stopped;
        joined
    }
}

async fn run_group(inner: Arc<GroupInner>, mut stop_rx: watch::Receiver<bool>) {
    let config = &inner.config;
    let mut cycles: u32 = 0;

    loop {
        if *stop_rx.borrow() {
            break;
        }
        if config.max_cycles > 0 && cycles >= config.max_cycles {
            break;
        }

        let started = Instant::now();
        if !inner.gateway.is_alive() {
            warn!("poll group '{}': transport not alive, skipping cycle", config.name);
        } else {
            for name in &config.var_names {
                if *stop_rx.borrow() {
                    break;
                }
                read_with_retries(&inner.gateway, name, config.per_read_retries).await;
            }
            cycles += 1;
        }

        let wait = config.interval.saturating_sub(started.elapsed());
        tokio::select! {
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }

    debug!("poll group '{}' finished after {cycles} cycles", config.name);
    *inner.state.lock() = GroupState::Stopped;
}

/// One member read. Failures are retried with a short spacing and then
/// dropped; the cycle goes on without this member.
async fn read_with_retries(gateway: &Gateway, name: &str, retries: u32) {
    let mut attempt: u32 = 0;
    loop {
        match gateway.read(name).await {
            Ok(Some(value)) => {
                debug!("[poll] {name} = {value}");
                return;
            }
            Ok(None) | Err(_) => {
                if attempt >= retries {
                    debug!("[poll] {name}: no value");
                    return;
                }
                attempt += 1;
                tokio::time::sleep(RETRY_SPACING).await;
            }
        }
    }
}

/// Owns every polling group by name.
pub struct PollerSet {
    gateway: Arc<Gateway>,
    groups: Mutex<HashMap<String, GroupHandle>>,
}

impl PollerSet {
    pub fn new(gateway: Arc<Gateway>) -> PollerSet {
        PollerSet {
            gateway,
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Create a group. A group with `max_cycles == 0` auto-starts; a
    /// finite group must be started explicitly. Re-creating an existing
    /// name stops and replaces the old group.
    pub async fn create_group(&self, config: GroupConfig) -> GroupHandle {
        let existing = self.groups.lock().remove(&config.name);
        if let Some(existing) = existing {
            existing.stop().await;
        }

        let handle = GroupHandle::new(config, Arc::clone(&self.gateway));
        if handle.inner.config.max_cycles == 0 {
            handle.start();
        }
        self.groups
            .lock()
            .insert(handle.name().to_string(), handle.clone());
        handle
    }

    pub fn group(&self, name: &str) -> Option<GroupHandle> {
        self.groups.lock().get(name).cloned()
    }

    pub async fn stop_group(&self, name: &str) -> bool {
        let handle = self.groups.lock().remove(name);
        match handle {
            Some(handle) => handle.stop().await,
            None => false,
        }
    }

    pub async fn stop_all(&self) {
        let handles: Vec<GroupHandle> = self.groups.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.stop().await;
        }
    }
}
