//! Handshake matcher: pairs a user's request for an auditor with the
//! auditor's request for the user.
//!
//! Each side's latest intent is stored in its own request record. The
//! handshake exists once both requests exist, and `completed` is always the
//! AND of both current intents, so the outcome does not depend on which side
//! shook first.

use cheq_store::StagedView;
use cheq_types::{Address, PairKey};
use tracing::{debug, info};

use crate::accounts::{resolve_account, update_account};
use crate::error::ProjectionResult;
use crate::records::{Handshake, RequestAuditor, RequestUser};

/// Project a `ShakeAuditor` event: `user` states its intent towards `auditor`.
///
/// Returns the handshake if both halves now exist.
pub fn shake_auditor(
    view: &mut StagedView<'_>,
    user: Address,
    auditor: Address,
    accepted: bool,
    timestamp: u64,
) -> ProjectionResult<Option<Handshake>> {
    let pair = PairKey::new(user, auditor);
    resolve_account(view, auditor)?;

    let key = pair.request_auditor_key();
    let mut request = match view.load::<RequestAuditor>(&key)? {
        Some(request) => request,
        None => {
            update_account(view, user, |a| a.auditors_requested += 1)?;
            RequestAuditor {
                id: key,
                user,
                auditor,
                is_waiting: accepted,
                created_at: timestamp,
            }
        }
    };
    request.is_waiting = accepted;
    view.stage(&request)?;
    debug!(user = %user, auditor = %auditor, accepted, "auditor requested");

    let Some(other) = view.load::<RequestUser>(&pair.request_user_key())? else {
        return Ok(None);
    };
    reconcile(view, pair, &request, &other, timestamp).map(Some)
}

/// Project a `ShakeUser` event: `auditor` states its intent towards `user`.
pub fn shake_user(
    view: &mut StagedView<'_>,
    auditor: Address,
    user: Address,
    accepted: bool,
    timestamp: u64,
) -> ProjectionResult<Option<Handshake>> {
    let pair = PairKey::new(user, auditor);
    resolve_account(view, user)?;

    let key = pair.request_user_key();
    let mut request = match view.load::<RequestUser>(&key)? {
        Some(request) => request,
        None => {
            update_account(view, auditor, |a| a.users_requested += 1)?;
            RequestUser {
                id: key,
                auditor,
                user,
                is_waiting: accepted,
                created_at: timestamp,
            }
        }
    };
    request.is_waiting = accepted;
    view.stage(&request)?;
    debug!(auditor = %auditor, user = %user, accepted, "user requested");

    let Some(other) = view.load::<RequestAuditor>(&pair.request_auditor_key())? else {
        return Ok(None);
    };
    reconcile(view, pair, &other, &request, timestamp).map(Some)
}

fn reconcile(
    view: &mut StagedView<'_>,
    pair: PairKey,
    auditor_half: &RequestAuditor,
    user_half: &RequestUser,
    timestamp: u64,
) -> ProjectionResult<Handshake> {
    let key = pair.handshake_key();
    let mut handshake = match view.load::<Handshake>(&key)? {
        Some(handshake) => handshake,
        None => Handshake {
            id: key,
            auditor: pair.auditor,
            user: pair.user,
            auditor_shake: auditor_half.id.clone(),
            user_shake: user_half.id.clone(),
            completed: false,
            completed_at: timestamp,
        },
    };
    let completed = auditor_half.is_waiting && user_half.is_waiting;
    if completed != handshake.completed {
        info!(user = %pair.user, auditor = %pair.auditor, completed, "handshake changed");
    }
    handshake.completed = completed;
    view.stage(&handshake)?;
    Ok(handshake)
}
