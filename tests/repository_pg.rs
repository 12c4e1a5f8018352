// Repository invariants that live in single SQL statements. These need a real
// Postgres; run them with a DATABASE_URL pointing at a scratch database:
//
//   DATABASE_URL=postgres://localhost/stablefund_test cargo test -- --ignored

use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use stablefund_backend::error::Error;
use stablefund_backend::models::{CreateCampaignRequest, PLACEHOLDER_ADDRESS};
use stablefund_backend::repository::{Database, DbPool};

async fn test_pool() -> DbPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for ignored tests");
    Database::init(&url).await.expect("database init")
}

fn unique_tag() -> String {
    Uuid::new_v4().simple().to_string()
}

fn unique_address(tag: &str) -> String {
    format!("0x{}{}", tag, &tag[..8])
}

fn campaign_request(tag: &str) -> CreateCampaignRequest {
    CreateCampaignRequest {
        slug: format!("camp-{tag}"),
        title: "Test campaign".into(),
        summary: String::new(),
        chain_id: "11155111".into(),
        currency: "usdc".into(),
        goal_amount: "1000000".into(),
        min_pledge_amount: "0".into(),
        deadline_at: Utc::now() + ChronoDuration::days(30),
    }
}

#[tokio::test]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn deposit_address_is_immutable_once_assigned() {
    let pool = test_pool().await;
    let tag = unique_tag();
    let creator = Database::create_profile(&pool, &format!("user-{tag}"))
        .await
        .unwrap();
    let campaign = Database::insert_campaign(&pool, creator.id, &campaign_request(&tag))
        .await
        .unwrap();
    assert_eq!(campaign.deposit_address, PLACEHOLDER_ADDRESS);

    let first = unique_address(&tag);
    assert!(Database::set_deposit_address(&pool, campaign.id, &first)
        .await
        .unwrap());

    // second assignment must not fire: the guard only matches the placeholder
    let second = unique_address(&unique_tag());
    assert!(!Database::set_deposit_address(&pool, campaign.id, &second)
        .await
        .unwrap());

    let stored = Database::find_campaign(&pool, &campaign.slug, Some(creator.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.deposit_address, first);
}

#[tokio::test]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn primary_wallet_flip_leaves_exactly_one_primary() {
    let pool = test_pool().await;
    let tag = unique_tag();
    let user = Database::create_profile(&pool, &format!("user-{tag}"))
        .await
        .unwrap();

    let a = Database::link_wallet(&pool, user.id, "11155111", &unique_address(&tag))
        .await
        .unwrap();
    let b = Database::link_wallet(&pool, user.id, "11155111", &unique_address(&unique_tag()))
        .await
        .unwrap();
    assert!(!a.is_primary && !b.is_primary);

    Database::set_primary_wallet(&pool, user.id, a.id).await.unwrap();
    Database::set_primary_wallet(&pool, user.id, b.id).await.unwrap();

    let wallets = Database::list_wallets(&pool, user.id).await.unwrap();
    let primaries: Vec<_> = wallets.iter().filter(|w| w.is_primary).collect();
    assert_eq!(primaries.len(), 1);
    assert_eq!(primaries[0].id, b.id);

    // flipping to a wallet the user does not own must not touch anything
    match Database::set_primary_wallet(&pool, user.id, Uuid::new_v4()).await {
        Err(Error::NotFound) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
    let wallets = Database::list_wallets(&pool, user.id).await.unwrap();
    assert_eq!(wallets.iter().filter(|w| w.is_primary).count(), 1);
}
