// Persistence layer: thin repository over the row-based tables.
//
// Row-level authorization lives here, in the WHERE clauses: published rows are
// world-readable, everything else belongs to its creator. Callers above this
// layer do not re-check permissions.

use anyhow::Result as AnyResult;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    Campaign, CampaignUpdate, CreateCampaignRequest, Profile, Wallet, PLACEHOLDER_ADDRESS,
};

pub type DbPool = Pool<Postgres>;

pub struct Database;

impl Database {
    /// Initialize database connection pool and run migrations.
    pub async fn init(database_url: &str) -> AnyResult<DbPool> {
        info!("Connecting to database: {}", database_url);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Database initialized successfully");
        Ok(pool)
    }

    // ---- profiles & sessions ----

    pub async fn create_profile(pool: &DbPool, username: &str) -> Result<Profile> {
        let profile = sqlx::query_as::<_, Profile>(
            "INSERT INTO profiles (username) VALUES ($1) RETURNING *",
        )
        .bind(username)
        .fetch_one(pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::invalid("username is already taken")
            }
            _ => Error::Database(e),
        })?;
        Ok(profile)
    }

    pub async fn find_profile_by_username(pool: &DbPool, username: &str) -> Result<Option<Profile>> {
        let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE username = $1")
            .bind(username)
            .fetch_optional(pool)
            .await?;
        Ok(profile)
    }

    pub async fn create_session(pool: &DbPool, user_id: Uuid) -> Result<Uuid> {
        let token = Uuid::new_v4();
        sqlx::query("INSERT INTO sessions (token, user_id) VALUES ($1, $2)")
            .bind(token)
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(token)
    }

    /// Resolve a bearer token to the authenticated identity.
    pub async fn session_user(pool: &DbPool, token: Uuid) -> Result<Option<Uuid>> {
        let user = sqlx::query_scalar::<_, Uuid>("SELECT user_id FROM sessions WHERE token = $1")
            .bind(token)
            .fetch_optional(pool)
            .await?;
        Ok(user)
    }

    // ---- campaigns ----

    pub async fn insert_campaign(
        pool: &DbPool,
        creator_id: Uuid,
        req: &CreateCampaignRequest,
    ) -> Result<Campaign> {
        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (
                slug, creator_id, title, summary, chain_id, currency,
                goal_amount, min_pledge_amount, deadline_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(&req.slug)
        .bind(creator_id)
        .bind(&req.title)
        .bind(&req.summary)
        .bind(&req.chain_id)
        .bind(&req.currency)
        .bind(&req.goal_amount)
        .bind(&req.min_pledge_amount)
        .bind(req.deadline_at)
        .fetch_one(pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::invalid("slug is already taken")
            }
            _ => Error::Database(e),
        })?;
        Ok(campaign)
    }

    /// Read a campaign as `viewer` sees it: published rows for everyone,
    /// drafts only for their creator. `None` is a valid empty result.
    pub async fn find_campaign(
        pool: &DbPool,
        slug: &str,
        viewer: Option<Uuid>,
    ) -> Result<Option<Campaign>> {
        let campaign = sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE slug = $1 AND (is_published OR creator_id = $2)",
        )
        .bind(slug)
        .bind(viewer.unwrap_or(Uuid::nil()))
        .fetch_optional(pool)
        .await?;
        Ok(campaign)
    }

    /// Fetch a campaign for a mutating operation. `NotFound` when the slug
    /// does not exist (or is an invisible draft), `Unauthorized` when the
    /// requester is not the creator.
    pub async fn find_campaign_owned(
        pool: &DbPool,
        slug: &str,
        requester: Uuid,
    ) -> Result<Campaign> {
        let campaign = Self::find_campaign(pool, slug, Some(requester))
            .await?
            .ok_or(Error::NotFound)?;
        if campaign.creator_id != requester {
            return Err(Error::Unauthorized);
        }
        Ok(campaign)
    }

    pub async fn list_published(pool: &DbPool) -> Result<Vec<Campaign>> {
        let campaigns = sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE is_published ORDER BY created_at DESC",
        )
        .fetch_all(pool)
        .await?;
        Ok(campaigns)
    }

    /// Assign the derived deposit address. Only fires while the placeholder
    /// is still in place, which makes the address immutable once set.
    pub async fn set_deposit_address(pool: &DbPool, id: Uuid, address: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE campaigns SET deposit_address = $2, updated_at = NOW()
             WHERE id = $1 AND deposit_address = $3",
        )
        .bind(id)
        .bind(address)
        .bind(PLACEHOLDER_ADDRESS)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn set_published(pool: &DbPool, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE campaigns SET is_published = TRUE, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_deadline(pool: &DbPool, id: Uuid, deadline_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE campaigns SET deadline_at = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(deadline_at)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn update_editorial(
        pool: &DbPool,
        id: Uuid,
        title: Option<&str>,
        summary: Option<&str>,
    ) -> Result<Campaign> {
        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                title = COALESCE($2, title),
                summary = COALESCE($3, summary),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(summary)
        .fetch_one(pool)
        .await?;
        Ok(campaign)
    }

    /// Economic terms; only legal while the campaign is an unpublished draft.
    pub async fn update_draft_terms(
        pool: &DbPool,
        id: Uuid,
        goal_amount: Option<&str>,
        min_pledge_amount: Option<&str>,
        deadline_at: Option<DateTime<Utc>>,
    ) -> Result<Campaign> {
        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                goal_amount = COALESCE($2, goal_amount),
                min_pledge_amount = COALESCE($3, min_pledge_amount),
                deadline_at = COALESCE($4, deadline_at),
                updated_at = NOW()
            WHERE id = $1 AND is_published = FALSE
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(goal_amount)
        .bind(min_pledge_amount)
        .bind(deadline_at)
        .fetch_optional(pool)
        .await?;
        campaign.ok_or_else(|| Error::invalid("economic terms are immutable once published"))
    }

    /// Delete is only permitted pre-publish.
    pub async fn delete_draft(pool: &DbPool, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM campaigns WHERE id = $1 AND is_published = FALSE")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    // ---- wallets ----

    pub async fn link_wallet(
        pool: &DbPool,
        user_id: Uuid,
        chain_id: &str,
        address: &str,
    ) -> Result<Wallet> {
        let wallet = sqlx::query_as::<_, Wallet>(
            "INSERT INTO wallets (user_id, chain_id, address) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(user_id)
        .bind(chain_id)
        .bind(address)
        .fetch_one(pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::invalid("address is already linked")
            }
            _ => Error::Database(e),
        })?;
        Ok(wallet)
    }

    pub async fn list_wallets(pool: &DbPool, user_id: Uuid) -> Result<Vec<Wallet>> {
        let wallets = sqlx::query_as::<_, Wallet>(
            "SELECT * FROM wallets WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;
        Ok(wallets)
    }

    pub async fn primary_wallet(pool: &DbPool, user_id: Uuid) -> Result<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(
            "SELECT * FROM wallets WHERE user_id = $1 AND is_primary",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
        Ok(wallet)
    }

    /// Flip the primary flag in a single statement, so at no instant does the
    /// user have zero or two primaries.
    pub async fn set_primary_wallet(pool: &DbPool, user_id: Uuid, wallet_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE wallets SET is_primary = (id = $2)
            WHERE user_id = $1
              AND EXISTS (SELECT 1 FROM wallets w WHERE w.id = $2 AND w.user_id = $1)
            "#,
        )
        .bind(user_id)
        .bind(wallet_id)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    // ---- campaign updates ----

    pub async fn insert_update(
        pool: &DbPool,
        campaign_id: Uuid,
        author_id: Uuid,
        title: &str,
        body_markdown: &str,
    ) -> Result<CampaignUpdate> {
        let update = sqlx::query_as::<_, CampaignUpdate>(
            r#"
            INSERT INTO campaign_updates (campaign_id, author_id, title, body_markdown)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(campaign_id)
        .bind(author_id)
        .bind(title)
        .bind(body_markdown)
        .fetch_one(pool)
        .await?;
        Ok(update)
    }

    pub async fn list_updates(pool: &DbPool, campaign_id: Uuid) -> Result<Vec<CampaignUpdate>> {
        let updates = sqlx::query_as::<_, CampaignUpdate>(
            "SELECT * FROM campaign_updates WHERE campaign_id = $1 ORDER BY created_at DESC",
        )
        .bind(campaign_id)
        .fetch_all(pool)
        .await?;
        Ok(updates)
    }
}
