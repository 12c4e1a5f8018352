// End-to-end checks over the chain simulation and the balance watcher,
// independent of Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use stablefund_backend::chain::{ChainAdapter, ChainState, MockChain, TxReceipt};
use stablefund_backend::error::{Error, Result};
use stablefund_backend::models::{Amount, CampaignStatus};
use stablefund_backend::reconciler::{
    ActivityFeed, PledgeNotification, PledgeNotifier, WatchTarget, WatcherRegistry, POLL_INTERVAL,
};

const DEPOSIT: &str = "0x1111111111111111111111111111111111111111";
const ALICE: &str = "0x00000000000000000000000000000000000000a1";

#[tokio::test]
async fn campaign_reaches_goal_and_finalizes_once() {
    let chain = MockChain::instant();
    let goal = Amount(4_000_000);

    // contributor A sends 3M then 2M before the deadline
    chain.credit(DEPOSIT, ALICE, Amount(3_000_000)).await.unwrap();
    chain.credit(DEPOSIT, ALICE, Amount(2_000_000)).await.unwrap();

    assert_eq!(
        chain.get_contribution(DEPOSIT, ALICE).await.unwrap(),
        Amount(5_000_000)
    );

    let before = Utc::now() + ChronoDuration::days(1);
    let state = chain.get_state(DEPOSIT, goal, before).await.unwrap();
    assert_eq!(state.status, CampaignStatus::Live);

    let after = Utc::now() - ChronoDuration::seconds(1);
    let state = chain.get_state(DEPOSIT, goal, after).await.unwrap();
    assert_eq!(state.status, CampaignStatus::Successful);
    assert_eq!(state.total_raised, Amount(5_000_000));
    assert_eq!(state.backer_count, 1);

    // finalize succeeds once, then reports AlreadyFinalized with no state change
    chain.finalize(DEPOSIT).await.unwrap();
    assert!(matches!(
        chain.finalize(DEPOSIT).await,
        Err(Error::AlreadyFinalized)
    ));

    let state = chain.get_state(DEPOSIT, goal, before).await.unwrap();
    assert_eq!(state.status, CampaignStatus::Finalized);
    assert_eq!(state.total_raised, Amount(5_000_000));
}

#[tokio::test]
async fn underfunded_campaign_fails_and_refund_is_unavailable() {
    let chain = MockChain::instant();
    let goal = Amount(4_000_000);
    chain.credit(DEPOSIT, ALICE, Amount(3_999_999)).await.unwrap();

    let after = Utc::now() - ChronoDuration::seconds(1);
    let state = chain.get_state(DEPOSIT, goal, after).await.unwrap();
    assert_eq!(state.status, CampaignStatus::Failed);

    assert!(matches!(
        chain.claim_refund(DEPOSIT, ALICE).await,
        Err(Error::NotImplemented(_))
    ));
}

#[tokio::test]
async fn raised_equal_to_goal_is_successful() {
    let chain = MockChain::instant();
    chain.credit(DEPOSIT, ALICE, Amount(4_000_000)).await.unwrap();

    let after = Utc::now() - ChronoDuration::seconds(1);
    let state = chain
        .get_state(DEPOSIT, Amount(4_000_000), after)
        .await
        .unwrap();
    assert_eq!(state.status, CampaignStatus::Successful);
}

/// Balance source that replays a fixed sequence of samples, one per poll,
/// then keeps returning the last one.
struct ScriptedChain {
    samples: Mutex<VecDeque<Amount>>,
    last: Mutex<Amount>,
}

impl ScriptedChain {
    fn new(samples: &[u128]) -> Self {
        Self {
            samples: Mutex::new(samples.iter().copied().map(Amount).collect()),
            last: Mutex::new(Amount::ZERO),
        }
    }
}

#[async_trait]
impl ChainAdapter for ScriptedChain {
    async fn get_state(
        &self,
        _address: &str,
        goal: Amount,
        deadline: DateTime<Utc>,
    ) -> Result<ChainState> {
        let raised = *self.last.lock().unwrap();
        Ok(ChainState {
            total_raised: raised,
            status: stablefund_backend::chain::derive_status(
                true,
                false,
                Utc::now(),
                deadline,
                raised,
                goal,
            ),
            is_finalized: false,
            backer_count: 1,
        })
    }

    async fn get_contribution(&self, _address: &str, _contributor: &str) -> Result<Amount> {
        Ok(Amount::ZERO)
    }

    async fn finalize(&self, _address: &str) -> Result<TxReceipt> {
        Err(Error::NotImplemented("scripted chain"))
    }

    async fn claim_refund(&self, _address: &str, _contributor: &str) -> Result<TxReceipt> {
        Err(Error::NotImplemented("scripted chain"))
    }

    async fn get_balance(&self, _address: &str) -> Result<Amount> {
        let mut samples = self.samples.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        if let Some(next) = samples.pop_front() {
            *last = next;
        }
        Ok(*last)
    }
}

/// Notifier that just records every event it is handed.
#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<PledgeNotification>>,
}

impl PledgeNotifier for RecordingNotifier {
    fn pledge_received(&self, event: PledgeNotification) {
        self.events.lock().unwrap().push(event);
    }
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn polling_notifies_exactly_on_observed_increases() {
    // balance sequence [100, 100, 250, 250, 400]: notifications fire only for
    // the 100->250 and 250->400 increases, never for the first sample or for
    // unchanged ones.
    let chain = Arc::new(ScriptedChain::new(&[100, 100, 250, 250, 400]));
    let notifier = Arc::new(RecordingNotifier::default());
    let registry = WatcherRegistry::new();

    let target = WatchTarget {
        campaign_id: Uuid::new_v4(),
        slug: "scripted".into(),
        deposit_address: DEPOSIT.into(),
        goal: Amount(1_000_000),
        deadline_at: Utc::now() + ChronoDuration::days(1),
    };
    let id = target.campaign_id;

    registry.watch(target, chain.clone(), notifier.clone());
    settle().await; // tick 1: first observation, silent

    for _ in 0..4 {
        tokio::time::advance(POLL_INTERVAL).await;
        settle().await;
    }

    let events = notifier.events.lock().unwrap().clone();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].delta, Amount(150));
    assert_eq!(events[0].balance, Amount(250));
    assert_eq!(events[1].delta, Amount(150));
    assert_eq!(events[1].balance, Amount(400));

    registry.unwatch(id);
}

#[tokio::test(start_paused = true)]
async fn watcher_feeds_campaign_activity() {
    let chain = Arc::new(MockChain::instant());
    let feed = Arc::new(ActivityFeed::new());
    let registry = WatcherRegistry::new();

    let target = WatchTarget {
        campaign_id: Uuid::new_v4(),
        slug: "with-feed".into(),
        deposit_address: DEPOSIT.into(),
        goal: Amount(10_000),
        deadline_at: Utc::now() + ChronoDuration::days(1),
    };
    let id = target.campaign_id;

    registry.watch(target, chain.clone(), feed.clone());
    settle().await;

    chain.credit(DEPOSIT, ALICE, Amount(2_500)).await.unwrap();
    tokio::time::advance(POLL_INTERVAL).await;
    settle().await;

    let events = feed.recent(id);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].delta, Amount(2_500));
    assert_eq!(events[0].slug, "with-feed");

    registry.unwatch(id);
}
