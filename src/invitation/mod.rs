//! Invitation lifecycle.
//!
//! ```text
//!   Pending ──accept──► Accepted
//!      │ ──decline─► Declined
//!      │ ──cancel──► Canceled
//!      └──ttl────► Expired   (derived at read time)
//! ```
//!
//! Every action is checked locally against the registry before it is
//! queued, then submitted through the sync client. The server's answer is
//! authoritative and the registry only changes when its confirmation is
//! dispatched. While the answer is outstanding the action is listed in
//! [`PendingActions`].

mod pending;

pub use pending::{ActionKind, PendingAction, PendingActions, PendingKey};

use chrono::Utc;
use kinsync_proto::Operation;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{Instrument, info, warn};
use uuid::Uuid;

use crate::error::InvitationError;
use crate::model::{
    EmailAddress, FamilyId, Invitation, InvitationDirection, InvitationStatus, InvitationToken,
    UserId,
};
use crate::permissions::{Capability, PermissionSet, Role, can_perform};
use crate::state::FamilyRegistry;
use crate::sync::SyncHandle;
use crate::telemetry::spans;

/// Input for [`InvitationManager::create`].
#[derive(Debug, Clone)]
pub struct NewInvitation {
    pub family_id: FamilyId,
    /// Raw address as typed; normalized before use.
    pub email: String,
    pub role: Role,
    pub restrictions: Option<PermissionSet>,
}

/// Runs invitation actions on behalf of the signed-in user.
pub struct InvitationManager {
    sync: SyncHandle,
    registry: Arc<FamilyRegistry>,
    user_id: UserId,
    email: EmailAddress,
    pending: PendingActions,
}

impl InvitationManager {
    pub fn new(sync: SyncHandle, user_id: UserId, email: EmailAddress) -> Self {
        let registry = Arc::clone(&sync.stores().registry);
        Self {
            sync,
            registry,
            user_id,
            email,
            pending: PendingActions::new(),
        }
    }

    pub fn pending(&self) -> &PendingActions {
        &self.pending
    }

    /// The pending action on an invitation, if any.
    pub fn pending_for(&self, token: &InvitationToken) -> Option<PendingAction> {
        self.pending.get(&PendingKey::Token(token.clone()))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Invitations addressed to the current user that can still be answered.
    pub fn received(&self) -> Vec<Invitation> {
        let now = Utc::now();
        let ttl = self.registry.invitation_ttl();
        self.registry
            .received_invitations(&self.email)
            .into_iter()
            .filter(|inv| inv.is_actionable(now, ttl))
            .collect()
    }

    /// Invitations the current user issued in `family_id`.
    pub fn sent(&self, family_id: &FamilyId) -> Vec<Invitation> {
        self.registry
            .invitations(family_id)
            .into_iter()
            .filter(|inv| inv.direction(&self.user_id, &self.email) == InvitationDirection::Sent)
            .collect()
    }

    /// Current status with expiry applied.
    pub fn status(&self, token: &InvitationToken) -> Option<InvitationStatus> {
        let invitation = self.registry.invitation(token)?;
        Some(invitation.status_at(Utc::now(), self.registry.invitation_ttl()))
    }

    // ------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------

    /// Invite `email` into a family. Requires `invite_members`.
    pub async fn create(&self, request: NewInvitation) -> Result<InvitationToken, InvitationError> {
        let email = EmailAddress::parse(&request.email)
            .map_err(|e| InvitationError::Validation(e.to_string()))?;
        self.require_invite_members(&request.family_id)?;

        if self
            .registry
            .pending_invitation(&request.family_id, &email, Utc::now())
            .is_some()
        {
            return Err(InvitationError::DuplicatePendingInvitation(email.to_string()));
        }

        let token = InvitationToken::generate();
        let input = json!({
            "token": token.as_str(),
            "family_id": request.family_id,
            "email": email,
            "inviter_id": self.user_id,
            "role": request.role,
            "restrictions": request.restrictions,
        });
        let key = PendingKey::Create {
            family_id: request.family_id.clone(),
            email: email.clone(),
        };
        // A create already in flight for the pair will produce the pending invitation.
        self.run(key, ActionKind::Create, Operation::InviteMember, input)
            .await
            .map_err(|e| match e {
                InvitationError::AlreadyResolved => {
                    InvitationError::DuplicatePendingInvitation(email.to_string())
                }
                other => other,
            })?;

        info!(family = %request.family_id, role = request.role.as_str(), "Invitation created");
        Ok(token)
    }

    /// Accept an invitation addressed to the current user.
    pub async fn accept(&self, token: &InvitationToken) -> Result<(), InvitationError> {
        self.answer(token, ActionKind::Accept, Operation::AcceptInvitation)
            .await
    }

    /// Decline an invitation addressed to the current user.
    pub async fn decline(&self, token: &InvitationToken) -> Result<(), InvitationError> {
        self.answer(token, ActionKind::Decline, Operation::DeclineInvitation)
            .await
    }

    /// Deliver a pending invitation again under the same token.
    pub async fn resend(&self, token: &InvitationToken) -> Result<(), InvitationError> {
        let invitation = self.manageable(token)?;
        self.run(
            PendingKey::Token(token.clone()),
            ActionKind::Resend,
            Operation::ResendInvitation,
            json!({ "token": token.as_str(), "family_id": invitation.family_id }),
        )
        .await
    }

    /// Withdraw a pending invitation. Allowed for its inviter and any
    /// member who can invite.
    pub async fn cancel(&self, token: &InvitationToken) -> Result<(), InvitationError> {
        let invitation = self.manageable(token)?;
        self.run(
            PendingKey::Token(token.clone()),
            ActionKind::Cancel,
            Operation::CancelInvitation,
            json!({
                "token": token.as_str(),
                "family_id": invitation.family_id,
                "user_id": self.user_id,
            }),
        )
        .await
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn answer(
        &self,
        token: &InvitationToken,
        kind: ActionKind,
        operation: Operation,
    ) -> Result<(), InvitationError> {
        if token.is_empty() {
            return Err(InvitationError::Validation("empty invitation token".into()));
        }

        // The invitee may not see the family yet; the server decides then.
        if let Some(invitation) = self.registry.invitation(token) {
            self.check_pending(&invitation)?;
            if invitation.email != self.email {
                return Err(InvitationError::EmailMismatch);
            }
        }

        self.run(
            PendingKey::Token(token.clone()),
            kind,
            operation,
            json!({
                "token": token.as_str(),
                "user_id": self.user_id,
                "email": self.email,
            }),
        )
        .await
    }

    /// A known, still pending invitation the current user may resend or cancel.
    fn manageable(&self, token: &InvitationToken) -> Result<Invitation, InvitationError> {
        if token.is_empty() {
            return Err(InvitationError::Validation("empty invitation token".into()));
        }
        let invitation = self
            .registry
            .invitation(token)
            .ok_or(InvitationError::TokenNotFound)?;
        self.check_pending(&invitation)?;
        if invitation.inviter_id != self.user_id {
            self.require_invite_members(&invitation.family_id)?;
        }
        Ok(invitation)
    }

    fn check_pending(&self, invitation: &Invitation) -> Result<(), InvitationError> {
        match invitation.status_at(Utc::now(), self.registry.invitation_ttl()) {
            InvitationStatus::Pending => Ok(()),
            InvitationStatus::Expired => Err(InvitationError::Expired),
            _ => Err(InvitationError::AlreadyResolved),
        }
    }

    fn require_invite_members(&self, family_id: &FamilyId) -> Result<(), InvitationError> {
        let member = self
            .registry
            .member(family_id, &self.user_id)
            .ok_or_else(|| InvitationError::PermissionDenied("not a member of this family".into()))?;
        if can_perform(&member, Capability::InviteMembers) {
            Ok(())
        } else {
            Err(InvitationError::PermissionDenied(format!(
                "role {} cannot invite members",
                member.role
            )))
        }
    }

    /// Submit one action while holding its pending claim.
    async fn run(
        &self,
        key: PendingKey,
        kind: ActionKind,
        operation: Operation,
        input: Value,
    ) -> Result<(), InvitationError> {
        let idempotency_key = Uuid::new_v4().to_string();
        let action = PendingAction {
            kind,
            idempotency_key: idempotency_key.clone(),
            submitted_at: Utc::now(),
        };
        let Some(_guard) = self.pending.reserve(key, action) else {
            return Err(InvitationError::AlreadyResolved);
        };

        let span = spans::action(operation.as_str(), &idempotency_key);
        async {
            let queued = self
                .sync
                .submit_with_key(operation, input, idempotency_key)
                .await?;
            match queued.outcome().await {
                Ok(_) => {
                    info!(action = kind.as_str(), "Invitation action confirmed");
                    Ok(())
                }
                Err(e) => {
                    let error = InvitationError::from(e);
                    warn!(action = kind.as_str(), error = %error, "Invitation action failed");
                    Err(error)
                }
            }
        }
        .instrument(span)
        .await
    }
}
