// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Rebalancing Scheduler
//!
//! Background task that periodically moves one randomly chosen rank to a
//! randomly chosen other nymph. A tick is skipped while the cluster is still
//! settling, i.e. when the number of registered ranks changed since the
//! previous tick.

use rand::seq::IndexedRandom;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::control::ControlHandle;
use crate::domain::location_db::LocationDb;
use crate::domain::node_config::SchedulerConfig;
use crate::domain::nymph_set::NymphSet;
use crate::domain::rank::{Location, Rank};

/// Chooses the next migration for a tick, or `None` when the tick is skipped.
pub fn plan_migration<R: Rng + ?Sized>(
    snapshot: &BTreeMap<Rank, Location>,
    nymphs: &[Location],
    last_len: usize,
    rng: &mut R,
) -> Option<(Rank, Location)> {
    if snapshot.is_empty() || snapshot.len() != last_len || nymphs.len() < 2 {
        return None;
    }

    let ranks: Vec<&Rank> = snapshot.keys().collect();
    let rank = **ranks.choose(rng)?;
    let current = snapshot.get(&rank)?;
    let candidates: Vec<&Location> = nymphs.iter().filter(|n| *n != current).collect();
    let dest = (*candidates.choose(rng)?).clone();
    Some((rank, dest))
}

pub struct Scheduler {
    locations: Arc<LocationDb>,
    nymphs: Arc<NymphSet>,
    control: ControlHandle,
    config: SchedulerConfig,
    last_len: AtomicUsize,
    shutdown_token: CancellationToken,
}

impl Scheduler {
    pub fn new(
        locations: Arc<LocationDb>,
        nymphs: Arc<NymphSet>,
        control: ControlHandle,
        config: SchedulerConfig,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            locations,
            nymphs,
            control,
            config,
            last_len: AtomicUsize::new(0),
            shutdown_token,
        }
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!("Rebalancing scheduler is disabled");
            return;
        }

        info!(period = ?self.config.period, "Starting rebalancing scheduler");
        let mut tick = interval(self.config.period);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.tick().await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }

        info!("Rebalancing scheduler stopped");
    }

    /// One scheduling round. Returns the migration that was attempted, if any.
    pub async fn tick(&self) -> Option<(Rank, Location)> {
        let snapshot = self.locations.dump();
        let nymphs = self.nymphs.get_nymphs();
        let last_len = self.last_len.swap(snapshot.len(), Ordering::SeqCst);

        let plan = {
            let mut rng = rand::rng();
            plan_migration(&snapshot, &nymphs, last_len, &mut rng)
        };
        let Some((rank, dest)) = plan else {
            debug!(ranks = snapshot.len(), last_len, nymphs = nymphs.len(), "Scheduler tick skipped");
            return None;
        };

        debug!(rank = %rank, dst = %dest, "Scheduler requesting migration");
        if let Err(e) = self.control.migrate(rank, dest.clone(), false).await {
            warn!(rank = %rank, dst = %dest, "Scheduled migration failed: {}", e);
        }
        Some((rank, dest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::control::testing::harness;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn snapshot(entries: &[(u32, &str)]) -> BTreeMap<Rank, Location> {
        entries
            .iter()
            .map(|(r, l)| (Rank(*r), Location::new(*l)))
            .collect()
    }

    fn nymphs(names: &[&str]) -> Vec<Location> {
        names.iter().map(|n| Location::new(*n)).collect()
    }

    #[test]
    fn test_skips_empty_or_changing_cluster() {
        let mut rng = StdRng::seed_from_u64(7);
        let two = nymphs(&["a", "b"]);
        assert_eq!(plan_migration(&snapshot(&[]), &two, 0, &mut rng), None);
        assert_eq!(plan_migration(&snapshot(&[(1, "a")]), &two, 0, &mut rng), None);
        assert_eq!(plan_migration(&snapshot(&[(1, "a"), (2, "b")]), &two, 1, &mut rng), None);
    }

    #[test]
    fn test_skips_with_single_nymph() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(
            plan_migration(&snapshot(&[(1, "a")]), &nymphs(&["a"]), 1, &mut rng),
            None
        );
    }

    #[test]
    fn test_destination_differs_from_current_location() {
        let snap = snapshot(&[(1, "a"), (2, "b"), (3, "c")]);
        let all = nymphs(&["a", "b", "c"]);
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let (rank, dest) = plan_migration(&snap, &all, 3, &mut rng).unwrap();
            assert_ne!(snap[&rank], dest);
            assert!(all.contains(&dest));
        }
    }

    #[tokio::test]
    async fn test_tick_waits_for_stable_count_then_migrates() {
        let h = harness();
        h.handle.register_nymph(Location::new("a")).await.unwrap();
        h.handle.register_nymph(Location::new("b")).await.unwrap();
        h.handle.register_container(Rank(1), Location::new("a")).await.unwrap();

        let scheduler = Scheduler::new(
            h.locations.clone(),
            h.nymphs.clone(),
            h.handle.clone(),
            SchedulerConfig::default(),
            h.shutdown.clone(),
        );

        assert_eq!(scheduler.tick().await, None);
        assert_eq!(scheduler.tick().await, Some((Rank(1), Location::new("b"))));
        assert_eq!(h.locations.get(Rank(1)), Some(Location::new("b")));
    }

    #[tokio::test]
    async fn test_disabled_scheduler_returns_immediately() {
        let h = harness();
        let scheduler = Arc::new(Scheduler::new(
            h.locations.clone(),
            h.nymphs.clone(),
            h.handle.clone(),
            SchedulerConfig {
                enabled: false,
                ..SchedulerConfig::default()
            },
            h.shutdown.clone(),
        ));
        scheduler.start().await.unwrap();
    }
}
