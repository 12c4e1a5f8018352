// Balance polling reconciler
//
// One watcher per displayed campaign samples the deposit address balance on a
// fixed interval, diffs it against the last observed value, and reports new
// pledges. The loop is interval-based: a poll completes before the next is
// scheduled, so two polls for the same address never overlap.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chain::ChainAdapter;
use crate::models::{Amount, Campaign};

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

const FEED_CAPACITY: usize = 256;

/// Outcome of folding one balance sample into the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// No prior observation existed; the sample is recorded silently so the
    /// initial load never reads as a new pledge.
    First(Amount),
    Unchanged(Amount),
    Increased { delta: Amount, balance: Amount },
    /// Balances are monotonically non-decreasing absent a refund; a drop is
    /// an anomaly to log, not to crash on.
    Decreased { delta: Amount, balance: Amount },
}

/// Last-observed-balance snapshot for a single deposit address. Ephemeral:
/// created when polling starts and discarded when it stops or the address
/// changes.
#[derive(Debug, Default)]
pub struct BalanceTracker {
    last: Option<Amount>,
}

impl BalanceTracker {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Fold in the current balance and report what changed. The snapshot is
    /// updated regardless of the delta's sign.
    pub fn observe(&mut self, current: Amount) -> Observation {
        let result = match self.last {
            None => Observation::First(current),
            Some(prev) if current == prev => Observation::Unchanged(current),
            Some(prev) => match current.checked_sub(prev) {
                Some(delta) => Observation::Increased {
                    delta,
                    balance: current,
                },
                None => Observation::Decreased {
                    delta: prev.checked_sub(current).unwrap_or(Amount::ZERO),
                    balance: current,
                },
            },
        };
        self.last = Some(current);
        result
    }
}

/// "New pledge received" event, as surfaced to clients via the activity feed.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PledgeNotification {
    pub campaign_id: Uuid,
    pub slug: String,
    pub delta: Amount,
    pub balance: Amount,
    pub observed_at: DateTime<Utc>,
}

/// Sink for pledge events. The watcher emits at most one event per observed
/// increase.
pub trait PledgeNotifier: Send + Sync {
    fn pledge_received(&self, event: PledgeNotification);
}

/// Capped in-memory feed of recent pledge events, queryable per campaign.
#[derive(Default)]
pub struct ActivityFeed {
    entries: Mutex<VecDeque<PledgeNotification>>,
}

impl ActivityFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recent(&self, campaign_id: Uuid) -> Vec<PledgeNotification> {
        let entries = self.entries.lock().expect("activity feed lock poisoned");
        entries
            .iter()
            .filter(|n| n.campaign_id == campaign_id)
            .cloned()
            .collect()
    }
}

impl PledgeNotifier for ActivityFeed {
    fn pledge_received(&self, event: PledgeNotification) {
        info!(
            campaign = %event.slug,
            delta = %event.delta,
            balance = %event.balance,
            "new pledge received"
        );
        let mut entries = self.entries.lock().expect("activity feed lock poisoned");
        if entries.len() == FEED_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(event);
    }
}

/// Everything the watcher needs to know about the campaign it monitors,
/// decoupled from the database row.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    pub campaign_id: Uuid,
    pub slug: String,
    pub deposit_address: String,
    pub goal: Amount,
    pub deadline_at: DateTime<Utc>,
}

impl WatchTarget {
    pub fn for_campaign(campaign: &Campaign) -> crate::error::Result<Self> {
        Ok(Self {
            campaign_id: campaign.id,
            slug: campaign.slug.clone(),
            deposit_address: campaign.deposit_address.clone(),
            goal: campaign.goal()?,
            deadline_at: campaign.deadline_at,
        })
    }
}

struct WatcherHandle {
    deposit_address: String,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Registry of active watchers, at most one per campaign. Watching an already
/// watched campaign is a no-op unless its deposit address changed, in which
/// case the old watcher is stopped and a fresh one (with a fresh snapshot)
/// takes over.
#[derive(Default)]
pub struct WatcherRegistry {
    watchers: Mutex<HashMap<Uuid, WatcherHandle>>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start polling for `target`. Returns false when a watcher for the same
    /// campaign and address was already running.
    pub fn watch(
        &self,
        target: WatchTarget,
        chain: Arc<dyn ChainAdapter>,
        notifier: Arc<dyn PledgeNotifier>,
    ) -> bool {
        let mut watchers = self.watchers.lock().expect("watcher registry lock poisoned");
        if let Some(existing) = watchers.get(&target.campaign_id) {
            if existing.deposit_address == target.deposit_address {
                return false;
            }
            // Address changed: discard the old snapshot along with the watcher.
            let _ = existing.stop.send(true);
            watchers.remove(&target.campaign_id);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let campaign_id = target.campaign_id;
        let deposit_address = target.deposit_address.clone();
        let task = tokio::spawn(run_watcher(target, chain, notifier, stop_rx));
        watchers.insert(
            campaign_id,
            WatcherHandle {
                deposit_address,
                stop: stop_tx,
                task,
            },
        );
        true
    }

    /// Stop the watcher for a campaign, if any. The in-flight poll (if one is
    /// running) completes but its result is discarded.
    pub fn unwatch(&self, campaign_id: Uuid) -> bool {
        let mut watchers = self.watchers.lock().expect("watcher registry lock poisoned");
        match watchers.remove(&campaign_id) {
            Some(handle) => {
                let _ = handle.stop.send(true);
                drop(handle.task);
                true
            }
            None => false,
        }
    }

    pub fn is_watching(&self, campaign_id: Uuid) -> bool {
        self.watchers
            .lock()
            .expect("watcher registry lock poisoned")
            .contains_key(&campaign_id)
    }
}

async fn run_watcher(
    target: WatchTarget,
    chain: Arc<dyn ChainAdapter>,
    notifier: Arc<dyn PledgeNotifier>,
    mut stop: watch::Receiver<bool>,
) {
    info!(campaign = %target.slug, address = %target.deposit_address, "starting balance watcher");

    let mut tracker = BalanceTracker::new();
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Ok on an explicit stop, Err when the registry dropped the sender.
            _ = stop.changed() => break,
            _ = interval.tick() => {}
        }

        let polled = chain.get_balance(&target.deposit_address).await;

        // Stale-poll guard: a result that arrives after deactivation must not
        // touch the tracker or emit anything.
        if *stop.borrow() {
            break;
        }

        match polled {
            Ok(balance) => match tracker.observe(balance) {
                Observation::First(balance) => {
                    debug!(campaign = %target.slug, %balance, "initial balance observed");
                }
                Observation::Unchanged(_) => {}
                Observation::Increased { delta, balance } => {
                    notifier.pledge_received(PledgeNotification {
                        campaign_id: target.campaign_id,
                        slug: target.slug.clone(),
                        delta,
                        balance,
                        observed_at: Utc::now(),
                    });
                    // Refresh the derived state so the feed and logs agree on
                    // where the campaign stands after the new pledge.
                    match chain
                        .get_state(&target.deposit_address, target.goal, target.deadline_at)
                        .await
                    {
                        Ok(state) => debug!(
                            campaign = %target.slug,
                            raised = %state.total_raised,
                            backers = state.backer_count,
                            "state refreshed after pledge"
                        ),
                        Err(e) => warn!(campaign = %target.slug, "state refresh failed: {e}"),
                    }
                }
                Observation::Decreased { delta, balance } => {
                    warn!(
                        campaign = %target.slug,
                        %balance,
                        drop = %delta,
                        "balance decreased; ignoring anomaly"
                    );
                }
            },
            // Polling failures never break the loop; the next tick still fires.
            Err(e) => warn!(campaign = %target.slug, "balance poll failed: {e}"),
        }

        // Nothing left to watch once the campaign leaves LIVE.
        if Utc::now() >= target.deadline_at {
            info!(campaign = %target.slug, "deadline passed, stopping balance watcher");
            break;
        }
    }

    debug!(campaign = %target.slug, "balance watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChain;
    use chrono::Duration as ChronoDuration;

    const ADDR: &str = "0x00000000000000000000000000000000000000aa";
    const ALICE: &str = "0x00000000000000000000000000000000000000a1";

    #[test]
    fn tracker_delta_sequence() {
        let samples = [100u128, 100, 250, 250, 400].map(Amount);
        let mut tracker = BalanceTracker::new();

        let observations: Vec<_> = samples.iter().map(|s| tracker.observe(*s)).collect();

        assert_eq!(observations[0], Observation::First(Amount(100)));
        assert_eq!(observations[1], Observation::Unchanged(Amount(100)));
        assert_eq!(
            observations[2],
            Observation::Increased {
                delta: Amount(150),
                balance: Amount(250)
            }
        );
        assert_eq!(observations[3], Observation::Unchanged(Amount(250)));
        assert_eq!(
            observations[4],
            Observation::Increased {
                delta: Amount(150),
                balance: Amount(400)
            }
        );
    }

    #[test]
    fn tracker_records_decrease_without_panicking() {
        let mut tracker = BalanceTracker::new();
        tracker.observe(Amount(500));
        let obs = tracker.observe(Amount(200));
        assert_eq!(
            obs,
            Observation::Decreased {
                delta: Amount(300),
                balance: Amount(200)
            }
        );
        // snapshot updated: climbing back up only reports the new ground
        assert_eq!(
            tracker.observe(Amount(350)),
            Observation::Increased {
                delta: Amount(150),
                balance: Amount(350)
            }
        );
    }

    fn target() -> WatchTarget {
        WatchTarget {
            campaign_id: Uuid::new_v4(),
            slug: "test-campaign".into(),
            deposit_address: ADDR.into(),
            goal: Amount(1_000_000),
            deadline_at: Utc::now() + ChronoDuration::days(30),
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn watcher_notifies_only_on_increase() {
        let chain = Arc::new(MockChain::instant());
        let feed = Arc::new(ActivityFeed::new());
        let registry = WatcherRegistry::new();
        let target = target();
        let id = target.campaign_id;

        assert!(registry.watch(target, chain.clone(), feed.clone()));
        settle().await;
        // first poll observed balance 0 silently
        assert!(feed.recent(id).is_empty());

        // no change across a tick
        tokio::time::advance(POLL_INTERVAL).await;
        settle().await;
        assert!(feed.recent(id).is_empty());

        chain.credit(ADDR, ALICE, Amount(150)).await.unwrap();
        tokio::time::advance(POLL_INTERVAL).await;
        settle().await;
        let events = feed.recent(id);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].delta, Amount(150));
        assert_eq!(events[0].balance, Amount(150));

        // unchanged again: still one event
        tokio::time::advance(POLL_INTERVAL).await;
        settle().await;
        assert_eq!(feed.recent(id).len(), 1);

        registry.unwatch(id);
    }

    #[tokio::test(start_paused = true)]
    async fn unwatch_stops_polling() {
        let chain = Arc::new(MockChain::instant());
        let feed = Arc::new(ActivityFeed::new());
        let registry = WatcherRegistry::new();
        let target = target();
        let id = target.campaign_id;

        registry.watch(target, chain.clone(), feed.clone());
        settle().await;
        assert!(registry.is_watching(id));

        assert!(registry.unwatch(id));
        settle().await;
        assert!(!registry.is_watching(id));

        // increases after deactivation go unreported
        chain.credit(ADDR, ALICE, Amount(500)).await.unwrap();
        tokio::time::advance(POLL_INTERVAL).await;
        settle().await;
        assert!(feed.recent(id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rewatching_same_address_is_a_noop() {
        let chain = Arc::new(MockChain::instant());
        let feed = Arc::new(ActivityFeed::new());
        let registry = WatcherRegistry::new();
        let target = target();
        let id = target.campaign_id;

        assert!(registry.watch(target.clone(), chain.clone(), feed.clone()));
        settle().await;
        assert!(!registry.watch(target, chain.clone(), feed.clone()));

        registry.unwatch(id);
    }
}
