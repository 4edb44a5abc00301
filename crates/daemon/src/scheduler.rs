//! The local and remote poll cycles.
//!
//! Each cycle fetches one partial view, merges it with the other domain's
//! view projected from the latest snapshot, diffs, persists and publishes.
//! Cycles are serialized on `cycle_lock` so the two loops never merge against
//! a snapshot the other is about to replace.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use repowatch_core::{
    advance_cursors, diff, merge, now, partial_views, prune_cursors, CollectError, CursorMap, Entity, LocalView,
    MergeContext, RemoteView,
};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::collect::{LocalSource, RemoteSource};
use crate::config::{Config, SharedConfig};
use crate::events::{CloneState, Event};
use crate::hub::Hub;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    Local,
    Remote,
}

impl Cycle {
    fn as_str(self) -> &'static str {
        match self {
            Cycle::Local => "local",
            Cycle::Remote => "remote",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CloneError {
    #[error("invalid repository name: {0:?}")]
    InvalidName(String),
    #[error("{0} is already cloned")]
    AlreadyCloned(String),
}

/// State that survives between cycles.
#[derive(Default)]
struct PollState {
    snapshot: RwLock<Vec<Entity>>,
    cursors: RwLock<CursorMap>,
    last_local: RwLock<Option<DateTime<Utc>>>,
    last_remote: RwLock<Option<DateTime<Utc>>>,
    cycle_lock: Mutex<()>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>, value: T) {
    *lock.write().unwrap_or_else(PoisonError::into_inner) = value;
}

pub struct Poller {
    config: SharedConfig,
    store: Store,
    hub: Hub<Event>,
    local: Arc<dyn LocalSource>,
    remote: Arc<dyn RemoteSource>,
    state: PollState,
}

impl Poller {
    /// Build a poller seeded with whatever the store holds. Unreadable files
    /// are logged and treated as empty.
    pub fn new(
        config: SharedConfig,
        store: Store,
        hub: Hub<Event>,
        local: Arc<dyn LocalSource>,
        remote: Arc<dyn RemoteSource>,
    ) -> Self {
        let snapshot = store.read_snapshot().unwrap_or_else(|e| {
            warn!(error = %e, "ignoring unreadable snapshot");
            Vec::new()
        });
        let cursors = store.read_cursors().unwrap_or_else(|e| {
            warn!(error = %e, "ignoring unreadable release cursors");
            CursorMap::new()
        });
        info!(
            repos = snapshot.len(),
            cursors = cursors.len(),
            dir = %store.dir().display(),
            "loaded persisted state"
        );

        Self {
            config,
            store,
            hub,
            local,
            remote,
            state: PollState {
                snapshot: RwLock::new(snapshot),
                cursors: RwLock::new(cursors),
                ..Default::default()
            },
        }
    }

    pub fn hub(&self) -> &Hub<Event> {
        &self.hub
    }

    pub fn remote(&self) -> &Arc<dyn RemoteSource> {
        &self.remote
    }

    pub fn config(&self) -> Config {
        read(&self.config).clone()
    }

    /// Replace the live config. Takes effect from the next cycle.
    pub fn set_config(&self, config: Config) {
        write(&self.config, config);
    }

    pub fn snapshot(&self) -> Vec<Entity> {
        read(&self.state.snapshot).clone()
    }

    pub fn find(&self, name: &str) -> Option<Entity> {
        read(&self.state.snapshot).iter().find(|e| e.name == name).cloned()
    }

    pub fn cursors(&self) -> CursorMap {
        read(&self.state.cursors).clone()
    }

    pub fn last_poll(&self, cycle: Cycle) -> Option<DateTime<Utc>> {
        match cycle {
            Cycle::Local => *read(&self.state.last_local),
            Cycle::Remote => *read(&self.state.last_remote),
        }
    }

    pub async fn run_local_cycle(&self) -> Result<(), CollectError> {
        let root = self.config().scan_root();
        let local = match self.local.scan(&root).await {
            Ok(views) => views,
            Err(e) => {
                self.report(Cycle::Local, &e);
                return Err(e);
            }
        };

        let _cycle = self.state.cycle_lock.lock().await;
        let previous = self.snapshot();
        let (_, remote) = partial_views(&previous);
        self.commit(Cycle::Local, previous, &local, &remote);
        Ok(())
    }

    pub async fn run_remote_cycle(&self) -> Result<(), CollectError> {
        let owner = self.config().github_owner;
        let remote = match self.remote.fetch(&owner).await {
            Ok(views) => views,
            Err(e) => {
                self.report(Cycle::Remote, &e);
                return Err(e);
            }
        };

        let _cycle = self.state.cycle_lock.lock().await;
        let previous = self.snapshot();
        let (local, _) = partial_views(&previous);
        self.commit(Cycle::Remote, previous, &local, &remote);
        Ok(())
    }

    fn commit(
        &self,
        cycle: Cycle,
        previous: Vec<Entity>,
        local: &BTreeMap<String, LocalView>,
        remote: &[RemoteView],
    ) {
        let started = Instant::now();
        let cfg = self.config();
        let ctx = MergeContext {
            scan_root: cfg.scan_root(),
            thresholds: cfg.thresholds(),
            now: now(),
        };

        let mut cursors = self.cursors();
        let next = merge(local, remote, &cursors, &ctx);

        let deltas = diff(&previous, &next);

        let mut cursors_changed = advance_cursors(&mut cursors, &next);
        if cycle == Cycle::Remote {
            cursors_changed |= prune_cursors(&mut cursors, &next) > 0;
        }

        if let Err(e) = self.store.write_snapshot(&next) {
            warn!(cycle = cycle.as_str(), error = %e, "snapshot not persisted");
        }
        if cursors_changed {
            if let Err(e) = self.store.write_cursors(&cursors) {
                warn!(cycle = cycle.as_str(), error = %e, "release cursors not persisted");
            }
        }
        write(&self.state.cursors, cursors);

        let total = next.len();
        let delta_count = deltas.len();
        self.hub.publish(Event::SnapshotUpdated(next.clone()));
        for delta in deltas {
            debug!(repo = delta.name(), "{delta:?}");
            self.hub.publish(delta.into());
        }

        write(&self.state.snapshot, next);
        let stamp = Some(ctx.now);
        match cycle {
            Cycle::Local => write(&self.state.last_local, stamp),
            Cycle::Remote => write(&self.state.last_remote, stamp),
        }

        info!(
            cycle = cycle.as_str(),
            repos = total,
            deltas = delta_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cycle complete"
        );
    }

    fn report(&self, cycle: Cycle, e: &CollectError) {
        warn!(cycle = cycle.as_str(), kind = e.kind(), error = %e, "cycle failed");
        self.hub.publish(Event::error(e.kind(), e.to_string()));
    }

    /// Start an asynchronous clone of `name` into the scan root. Progress is
    /// published as `clone-progress` events; a successful clone triggers a
    /// local cycle.
    pub async fn start_clone(self: &Arc<Self>, name: &str) -> Result<PathBuf, CloneError> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(CloneError::InvalidName(name.to_string()));
        }
        let cfg = self.config();
        let dest = cfg.scan_root().join(name);
        if tokio::fs::try_exists(dest.join(".git")).await.unwrap_or(false) {
            return Err(CloneError::AlreadyCloned(name.to_string()));
        }

        let owner = self
            .find(name)
            .and_then(|e| e.full_name.split_once('/').map(|(o, _)| o.to_string()))
            .unwrap_or(cfg.github_owner);

        let poller = Arc::clone(self);
        let name = name.to_string();
        let target = dest.clone();
        tokio::spawn(async move {
            poller.publish_clone(&name, CloneState::Cloning, None);
            info!(repo = %name, dest = %target.display(), "clone started");
            match poller.remote.clone_repo(&owner, &name, &target).await {
                Ok(()) => {
                    info!(repo = %name, "clone finished");
                    poller.publish_clone(&name, CloneState::Done, None);
                    let _ = poller.run_local_cycle().await;
                }
                Err(e) => {
                    warn!(repo = %name, error = %e, "clone failed");
                    poller.publish_clone(&name, CloneState::Failed, Some(e.to_string()));
                }
            }
        });
        Ok(dest)
    }

    fn publish_clone(&self, repo: &str, state: CloneState, error: Option<String>) {
        self.hub.publish(Event::CloneProgress {
            repo: repo.to_string(),
            state,
            error,
        });
    }

    /// Spawn the local, remote and heartbeat loops. Each stops at its next
    /// wait point once `shutdown` flips to `true`.
    pub fn spawn_loops(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Arc::clone(self).poll_loop(Cycle::Local, shutdown.clone())),
            tokio::spawn(Arc::clone(self).poll_loop(Cycle::Remote, shutdown.clone())),
            tokio::spawn(Arc::clone(self).heartbeat_loop(shutdown)),
        ]
    }

    fn period(&self, cycle: Cycle) -> Duration {
        let cfg = read(&self.config);
        match cycle {
            Cycle::Local => cfg.local_interval(),
            Cycle::Remote => cfg.remote_interval(),
        }
    }

    async fn poll_loop(self: Arc<Self>, cycle: Cycle, mut shutdown: watch::Receiver<bool>) {
        let mut period = self.period(cycle);
        // The first tick completes immediately.
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(cycle = cycle.as_str(), every_secs = period.as_secs(), "poll loop started");

        loop {
            tokio::select! {
                biased;
                _ = stopped(&mut shutdown) => break,
                _ = tick.tick() => {}
            }

            // Failures are already reported on the hub.
            let _ = match cycle {
                Cycle::Local => self.run_local_cycle().await,
                Cycle::Remote => self.run_remote_cycle().await,
            };

            let configured = self.period(cycle);
            if configured != period {
                info!(cycle = cycle.as_str(), every_secs = configured.as_secs(), "poll interval changed");
                period = configured;
                tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            }
        }
        info!(cycle = cycle.as_str(), "poll loop stopped");
    }

    async fn heartbeat_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = read(&self.config).heartbeat_interval();
        let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = stopped(&mut shutdown) => break,
                _ = tick.tick() => self.hub.publish(Event::Heartbeat { at: now() }),
            }
        }
        debug!("heartbeat loop stopped");
    }
}

/// Resolves once shutdown is requested or the sender is gone.
pub async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
