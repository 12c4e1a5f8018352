// Campaign lifecycle operations.
//
// The legal transitions: DRAFT -> LIVE via an explicit publish (requires a
// derived deposit address), LIVE -> SUCCESSFUL/FAILED purely by the clock and
// the raised/goal comparison, SUCCESSFUL -> FINALIZED by the creator, once.
// Status itself is never stored; reads recompute it from the chain state.

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::chain::TxReceipt;
use crate::error::{Error, Result};
use crate::models::{
    canonical_address, Amount, Campaign, CampaignStatus, CampaignUpdate, CampaignView,
    ContributeRequest, CreateCampaignRequest, LinkWalletRequest, PostUpdateRequest,
    SessionResponse, UpdateCampaignRequest, Wallet,
};
use crate::reconciler::{PledgeNotification, WatchTarget};
use crate::repository::Database;
use crate::AppState;

fn validate_slug(slug: &str) -> Result<()> {
    if slug.is_empty() || slug.len() > 64 {
        return Err(Error::invalid("slug must be 1-64 characters"));
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(Error::invalid(
            "slug may only contain lowercase letters, digits and dashes",
        ));
    }
    Ok(())
}

/// Publish precondition: a campaign cannot go live without a receiving
/// address.
fn ensure_publishable(campaign: &Campaign) -> Result<()> {
    if !campaign.has_deposit_address() {
        return Err(Error::invalid(
            "cannot publish before a deposit address is assigned",
        ));
    }
    Ok(())
}

// ---- auth ----

pub async fn register(state: &AppState, username: &str) -> Result<SessionResponse> {
    let username = username.trim();
    if username.is_empty() {
        return Err(Error::invalid("username must not be empty"));
    }
    let profile = Database::create_profile(&state.db, username).await?;
    let token = Database::create_session(&state.db, profile.id).await?;
    Ok(SessionResponse {
        token,
        user_id: profile.id,
    })
}

pub async fn login(state: &AppState, username: &str) -> Result<SessionResponse> {
    let profile = Database::find_profile_by_username(&state.db, username.trim())
        .await?
        .ok_or(Error::Unauthenticated)?;
    let token = Database::create_session(&state.db, profile.id).await?;
    Ok(SessionResponse {
        token,
        user_id: profile.id,
    })
}

// ---- campaign lifecycle ----

/// Create an unpublished draft, then ask the signer for its deposit address.
/// A derivation failure is logged and swallowed: the draft survives with the
/// placeholder address and can be repaired via [`retry_derivation`].
pub async fn create_campaign(
    state: &AppState,
    creator: Uuid,
    req: CreateCampaignRequest,
) -> Result<Campaign> {
    validate_slug(&req.slug)?;
    if req.title.trim().is_empty() {
        return Err(Error::invalid("title must not be empty"));
    }
    req.goal_amount.parse::<Amount>()?;
    req.min_pledge_amount.parse::<Amount>()?;
    if req.deadline_at <= Utc::now() {
        return Err(Error::invalid("deadline must be in the future"));
    }

    let mut campaign = Database::insert_campaign(&state.db, creator, &req).await?;

    match state.deriver.derive(campaign.campaign_index).await {
        Ok(address) => {
            if Database::set_deposit_address(&state.db, campaign.id, &address).await? {
                campaign.deposit_address = address;
            }
        }
        Err(e) => {
            warn!(
                campaign = %campaign.slug,
                index = campaign.campaign_index,
                "address derivation failed, draft keeps placeholder: {e}"
            );
        }
    }

    Ok(campaign)
}

/// Repair hook for drafts whose derivation call failed at creation time.
pub async fn retry_derivation(state: &AppState, requester: Uuid, slug: &str) -> Result<Campaign> {
    let mut campaign = Database::find_campaign_owned(&state.db, slug, requester).await?;
    if campaign.has_deposit_address() {
        return Ok(campaign);
    }
    let address = state.deriver.derive(campaign.campaign_index).await?;
    if Database::set_deposit_address(&state.db, campaign.id, &address).await? {
        campaign.deposit_address = address;
    }
    Ok(campaign)
}

pub async fn list_campaigns(state: &AppState) -> Result<Vec<Campaign>> {
    Database::list_published(&state.db).await
}

/// Campaign row plus freshly derived chain state. Status is computed on every
/// read; nothing here is cached or stored.
pub async fn campaign_view(
    state: &AppState,
    viewer: Option<Uuid>,
    slug: &str,
) -> Result<CampaignView> {
    let campaign = Database::find_campaign(&state.db, slug, viewer)
        .await?
        .ok_or(Error::NotFound)?;

    if !campaign.is_published || !campaign.has_deposit_address() {
        return Ok(CampaignView {
            status: CampaignStatus::Draft,
            total_raised: Amount::ZERO,
            backer_count: 0,
            is_finalized: false,
            my_contribution: None,
            campaign,
        });
    }

    let chain_state = state
        .chain
        .get_state(
            &campaign.deposit_address,
            campaign.goal()?,
            campaign.deadline_at,
        )
        .await?;

    let my_contribution = match viewer {
        Some(user) => match Database::primary_wallet(&state.db, user).await? {
            Some(wallet) => Some(
                state
                    .chain
                    .get_contribution(&campaign.deposit_address, &wallet.address)
                    .await?,
            ),
            None => None,
        },
        None => None,
    };

    Ok(CampaignView {
        status: chain_state.status,
        total_raised: chain_state.total_raised,
        backer_count: chain_state.backer_count,
        is_finalized: chain_state.is_finalized,
        my_contribution,
        campaign,
    })
}

pub async fn edit_campaign(
    state: &AppState,
    requester: Uuid,
    slug: &str,
    req: UpdateCampaignRequest,
) -> Result<Campaign> {
    let campaign = Database::find_campaign_owned(&state.db, slug, requester).await?;

    let touches_terms =
        req.goal_amount.is_some() || req.min_pledge_amount.is_some() || req.deadline_at.is_some();
    if touches_terms {
        if campaign.is_published {
            return Err(Error::invalid("economic terms are immutable once published"));
        }
        if let Some(goal) = &req.goal_amount {
            goal.parse::<Amount>()?;
        }
        if let Some(min) = &req.min_pledge_amount {
            min.parse::<Amount>()?;
        }
        if let Some(deadline) = req.deadline_at {
            if deadline <= Utc::now() {
                return Err(Error::invalid("deadline must be in the future"));
            }
        }
        Database::update_draft_terms(
            &state.db,
            campaign.id,
            req.goal_amount.as_deref(),
            req.min_pledge_amount.as_deref(),
            req.deadline_at,
        )
        .await?;
    }

    // Title and summary stay editable for the campaign's whole life.
    Database::update_editorial(
        &state.db,
        campaign.id,
        req.title.as_deref(),
        req.summary.as_deref(),
    )
    .await
}

pub async fn delete_campaign(state: &AppState, requester: Uuid, slug: &str) -> Result<()> {
    let campaign = Database::find_campaign_owned(&state.db, slug, requester).await?;
    if !Database::delete_draft(&state.db, campaign.id).await? {
        return Err(Error::invalid("published campaigns cannot be deleted"));
    }
    Ok(())
}

/// DRAFT -> LIVE. Requires the deposit address to be assigned; a no-op when
/// the campaign is already published.
pub async fn publish(state: &AppState, requester: Uuid, slug: &str) -> Result<Campaign> {
    let mut campaign = Database::find_campaign_owned(&state.db, slug, requester).await?;
    if campaign.is_published {
        return Ok(campaign);
    }
    ensure_publishable(&campaign)?;
    Database::set_published(&state.db, campaign.id).await?;
    campaign.is_published = true;
    Ok(campaign)
}

/// Close early: move the deadline to now, so the next status computation
/// resolves to SUCCESSFUL or FAILED by the usual comparison.
pub async fn close_early(state: &AppState, requester: Uuid, slug: &str) -> Result<Campaign> {
    let mut campaign = Database::find_campaign_owned(&state.db, slug, requester).await?;
    if !campaign.is_published {
        return Err(Error::invalid("only published campaigns can be closed"));
    }
    let now = Utc::now();
    if campaign.deadline_at <= now {
        return Err(Error::invalid("campaign has already ended"));
    }
    Database::set_deadline(&state.db, campaign.id, now).await?;
    campaign.deadline_at = now;
    state.watchers.unwatch(campaign.id);
    Ok(campaign)
}

/// SUCCESSFUL -> FINALIZED, creator only, irreversible.
pub async fn finalize(state: &AppState, requester: Uuid, slug: &str) -> Result<TxReceipt> {
    let campaign = Database::find_campaign_owned(&state.db, slug, requester).await?;
    if !campaign.is_published || !campaign.has_deposit_address() {
        return Err(Error::invalid("campaign is not live yet"));
    }

    let chain_state = state
        .chain
        .get_state(
            &campaign.deposit_address,
            campaign.goal()?,
            campaign.deadline_at,
        )
        .await?;
    match chain_state.status {
        CampaignStatus::Successful => {}
        CampaignStatus::Finalized => return Err(Error::AlreadyFinalized),
        _ => {
            return Err(Error::invalid(
                "only successful campaigns can be finalized",
            ))
        }
    }

    let receipt = state.chain.finalize(&campaign.deposit_address).await?;
    state.watchers.unwatch(campaign.id);
    Ok(receipt)
}

/// Refund claims are a documented contract with no implementation behind it.
pub async fn claim_refund(state: &AppState, requester: Uuid, slug: &str) -> Result<TxReceipt> {
    let campaign = Database::find_campaign(&state.db, slug, Some(requester))
        .await?
        .ok_or(Error::NotFound)?;
    let wallet = Database::primary_wallet(&state.db, requester)
        .await?
        .ok_or_else(|| Error::invalid("no primary wallet linked"))?;
    state
        .chain
        .claim_refund(&campaign.deposit_address, &wallet.address)
        .await
}

// ---- contributions (simulation deposit path) ----

/// Credit a contribution to the mock ledger. Real deployments take deposits
/// straight on-chain; this route only exists while the chain is simulated.
pub async fn contribute(state: &AppState, slug: &str, req: ContributeRequest) -> Result<Amount> {
    let simulator = state.simulator.as_ref().ok_or(Error::NotImplemented(
        "contributions are settled on-chain, not through this API",
    ))?;

    let contributor = canonical_address(&req.contributor_address)?;
    let amount: Amount = req.amount.parse()?;
    if amount.is_zero() {
        return Err(Error::invalid("contribution must be positive"));
    }

    let campaign = Database::find_campaign(&state.db, slug, None)
        .await?
        .ok_or(Error::NotFound)?;
    if !campaign.has_deposit_address() {
        return Err(Error::invalid("campaign has no deposit address"));
    }
    if Utc::now() >= campaign.deadline_at {
        return Err(Error::invalid("campaign has ended"));
    }
    if amount < campaign.min_pledge()? {
        return Err(Error::invalid(format!(
            "contribution is below the minimum pledge of {}",
            campaign.min_pledge_amount
        )));
    }

    simulator
        .credit(&campaign.deposit_address, &contributor, amount)
        .await
}

// ---- balance watching ----

pub async fn watch_campaign(state: &AppState, slug: &str) -> Result<bool> {
    let campaign = Database::find_campaign(&state.db, slug, None)
        .await?
        .ok_or(Error::NotFound)?;
    if !campaign.has_deposit_address() || Utc::now() >= campaign.deadline_at {
        return Err(Error::invalid("campaign is not live"));
    }
    let target = WatchTarget::for_campaign(&campaign)?;
    Ok(state
        .watchers
        .watch(target, state.chain.clone(), state.feed.clone()))
}

pub async fn unwatch_campaign(state: &AppState, slug: &str) -> Result<bool> {
    let campaign = Database::find_campaign(&state.db, slug, None)
        .await?
        .ok_or(Error::NotFound)?;
    Ok(state.watchers.unwatch(campaign.id))
}

pub async fn campaign_activity(state: &AppState, slug: &str) -> Result<Vec<PledgeNotification>> {
    let campaign = Database::find_campaign(&state.db, slug, None)
        .await?
        .ok_or(Error::NotFound)?;
    Ok(state.feed.recent(campaign.id))
}

// ---- wallets ----

pub async fn link_wallet(state: &AppState, user: Uuid, req: LinkWalletRequest) -> Result<Wallet> {
    let address = canonical_address(&req.address)?;
    let mut wallet = Database::link_wallet(&state.db, user, &req.chain_id, &address).await?;
    if req.make_primary {
        Database::set_primary_wallet(&state.db, user, wallet.id).await?;
        wallet.is_primary = true;
    }
    Ok(wallet)
}

pub async fn set_primary_wallet(state: &AppState, user: Uuid, wallet_id: Uuid) -> Result<()> {
    Database::set_primary_wallet(&state.db, user, wallet_id).await
}

pub async fn list_wallets(state: &AppState, user: Uuid) -> Result<Vec<Wallet>> {
    Database::list_wallets(&state.db, user).await
}

// ---- campaign updates ----

pub async fn post_update(
    state: &AppState,
    requester: Uuid,
    slug: &str,
    req: PostUpdateRequest,
) -> Result<CampaignUpdate> {
    if req.title.trim().is_empty() {
        return Err(Error::invalid("update title must not be empty"));
    }
    let campaign = Database::find_campaign_owned(&state.db, slug, requester).await?;
    Database::insert_update(
        &state.db,
        campaign.id,
        requester,
        &req.title,
        &req.body_markdown,
    )
    .await
}

pub async fn list_updates(
    state: &AppState,
    viewer: Option<Uuid>,
    slug: &str,
) -> Result<Vec<CampaignUpdate>> {
    let campaign = Database::find_campaign(&state.db, slug, viewer)
        .await?
        .ok_or(Error::NotFound)?;
    Database::list_updates(&state.db, campaign.id).await
}
