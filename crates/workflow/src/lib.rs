//! Client-side model of the revision-request lifecycle: the legal
//! transitions, the role/type gating for each, and the guard checks that
//! run before any network call. The backend remains the authority and
//! re-validates every payload produced here.

use serde::{Deserialize, Serialize};
use shared::{
    domain::{FileId, RevisionStatus, RevisionType, Role},
    protocol::{RevisionRequest, RevisionRequestUpdate},
};
use thiserror::Error;

/// Maximum length of a rejection reason, in characters.
pub const MAX_REJECTION_REASON_CHARS: usize = 150;

/// Identity of an action, without its payload. Used for the
/// (status, role, type) -> allowed-actions lookup that presentation code
/// filters its buttons through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ProposePrice,
    StartBugFix,
    ApprovePrice,
    RejectRequest,
    DeliverModel,
    ApproveModel,
    RejectModel,
    Redeliver,
}

/// A transition request with the data that transition introduces.
#[derive(Debug, Clone, PartialEq)]
pub enum RevisionAction {
    /// Designer prices a Modification / Additional Features request.
    ProposePrice { amount: i64 },
    /// Bug fixes carry no price; the designer moves straight to work.
    StartBugFix,
    /// Company accepts the proposed price. Guarded by the wallet balance.
    ApprovePrice,
    /// Company declines the request before or after pricing.
    RejectRequest { reason: String },
    /// Designer uploads the finished model.
    DeliverModel { model_file: FileId },
    /// Company accepts the delivered model, naming it for their library.
    ApproveModel { name: String, description: String },
    /// Company sends the model back for rework.
    RejectModel { reason: String },
    /// Designer re-enters Processing after a rejected Bug Fix delivery.
    Redeliver,
}

impl RevisionAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::ProposePrice { .. } => ActionKind::ProposePrice,
            Self::StartBugFix => ActionKind::StartBugFix,
            Self::ApprovePrice => ActionKind::ApprovePrice,
            Self::RejectRequest { .. } => ActionKind::RejectRequest,
            Self::DeliverModel { .. } => ActionKind::DeliverModel,
            Self::ApproveModel { .. } => ActionKind::ApproveModel,
            Self::RejectModel { .. } => ActionKind::RejectModel,
            Self::Redeliver => ActionKind::Redeliver,
        }
    }
}

/// External facts a guard may need. The wallet balance is a pre-flight
/// check only; it can change concurrently and the backend re-validates.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardContext {
    pub wallet_balance: Option<i64>,
}

impl GuardContext {
    pub fn with_balance(balance: i64) -> Self {
        Self {
            wallet_balance: Some(balance),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum WorkflowError {
    #[error("action {action:?} is not legal from status {from:?}")]
    IllegalTransition {
        from: RevisionStatus,
        action: ActionKind,
    },
    #[error("role {role:?} may not perform {action:?}")]
    RoleNotAllowed { role: Role, action: ActionKind },
    #[error("action {action:?} does not apply to revision type {revision_type:?}")]
    WrongRevisionType {
        revision_type: RevisionType,
        action: ActionKind,
    },
    #[error("insufficient points: balance {balance} is below the proposed price {required}")]
    InsufficientBalance { balance: i64, required: i64 },
    #[error("wallet balance is unknown; refresh the wallet before approving a price")]
    BalanceUnknown,
    #[error("request has no price proposal to approve")]
    MissingPriceProposal,
    #[error("proposed price must be a positive point amount")]
    InvalidPrice,
    #[error("a rejection reason is required")]
    ReasonRequired,
    #[error("rejection reason is {len} characters; the limit is {MAX_REJECTION_REASON_CHARS}")]
    ReasonTooLong { len: usize },
    #[error("approving a model requires a non-empty name and description")]
    MissingApprovalDetails,
}

struct TransitionRule {
    from: RevisionStatus,
    action: ActionKind,
    to: RevisionStatus,
    actor: Role,
    /// None means any revision type.
    only_for: Option<&'static [RevisionType]>,
}

const PRICED_TYPES: &[RevisionType] = &[RevisionType::Modification, RevisionType::AdditionalFeatures];
const BUG_FIX_ONLY: &[RevisionType] = &[RevisionType::BugFix];

/// The legal-transition table from the workflow design, one row per
/// (state, action) pair. `Rejected -> Processing` is deliberately a
/// distinct `Redeliver` row restricted to Bug Fix rework rather than a
/// general re-entry cycle.
const TRANSITIONS: &[TransitionRule] = &[
    TransitionRule {
        from: RevisionStatus::Pending,
        action: ActionKind::ProposePrice,
        to: RevisionStatus::PriceProposed,
        actor: Role::Designer,
        only_for: Some(PRICED_TYPES),
    },
    TransitionRule {
        from: RevisionStatus::Pending,
        action: ActionKind::StartBugFix,
        to: RevisionStatus::Processing,
        actor: Role::Designer,
        only_for: Some(BUG_FIX_ONLY),
    },
    TransitionRule {
        from: RevisionStatus::Pending,
        action: ActionKind::RejectRequest,
        to: RevisionStatus::Rejected,
        actor: Role::Company,
        only_for: None,
    },
    TransitionRule {
        from: RevisionStatus::PriceProposed,
        action: ActionKind::ApprovePrice,
        to: RevisionStatus::Processing,
        actor: Role::Company,
        only_for: None,
    },
    TransitionRule {
        from: RevisionStatus::PriceProposed,
        action: ActionKind::RejectRequest,
        to: RevisionStatus::Rejected,
        actor: Role::Company,
        only_for: None,
    },
    TransitionRule {
        from: RevisionStatus::Processing,
        action: ActionKind::DeliverModel,
        to: RevisionStatus::Delivered,
        actor: Role::Designer,
        only_for: None,
    },
    TransitionRule {
        from: RevisionStatus::Delivered,
        action: ActionKind::ApproveModel,
        to: RevisionStatus::Completed,
        actor: Role::Company,
        only_for: None,
    },
    TransitionRule {
        from: RevisionStatus::Delivered,
        action: ActionKind::RejectModel,
        to: RevisionStatus::Rejected,
        actor: Role::Company,
        only_for: None,
    },
    TransitionRule {
        from: RevisionStatus::Rejected,
        action: ActionKind::Redeliver,
        to: RevisionStatus::Processing,
        actor: Role::Designer,
        only_for: Some(BUG_FIX_ONLY),
    },
];

fn rule_applies(rule: &TransitionRule, revision_type: RevisionType) -> bool {
    match rule.only_for {
        Some(types) => types.contains(&revision_type),
        None => true,
    }
}

fn find_rule(
    from: RevisionStatus,
    action: ActionKind,
) -> Option<&'static TransitionRule> {
    TRANSITIONS
        .iter()
        .find(|rule| rule.from == from && rule.action == action)
}

/// Actions available at `status` for a viewer with `role` on a request of
/// `revision_type`. Presentation code renders exactly this set.
pub fn allowed_actions(
    status: RevisionStatus,
    role: Role,
    revision_type: RevisionType,
) -> Vec<ActionKind> {
    TRANSITIONS
        .iter()
        .filter(|rule| {
            rule.from == status && rule.actor == role && rule_applies(rule, revision_type)
        })
        .map(|rule| rule.action)
        .collect()
}

fn validate_reason(reason: &str) -> Result<String, WorkflowError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(WorkflowError::ReasonRequired);
    }
    let len = trimmed.chars().count();
    if len > MAX_REJECTION_REASON_CHARS {
        return Err(WorkflowError::ReasonTooLong { len });
    }
    Ok(trimmed.to_string())
}

/// Validates `action` against the transition table and its guards, and on
/// success constructs the one-shot update payload (the entire intended next
/// status plus any new fields). A guard failure produces no payload, so the
/// caller issues no network call.
pub fn plan_transition(
    request: &RevisionRequest,
    role: Role,
    action: RevisionAction,
    ctx: GuardContext,
) -> Result<RevisionRequestUpdate, WorkflowError> {
    let kind = action.kind();

    let rule = find_rule(request.status, kind).ok_or(WorkflowError::IllegalTransition {
        from: request.status,
        action: kind,
    })?;
    if rule.actor != role {
        return Err(WorkflowError::RoleNotAllowed { role, action: kind });
    }
    if !rule_applies(rule, request.revision_type) {
        return Err(WorkflowError::WrongRevisionType {
            revision_type: request.revision_type,
            action: kind,
        });
    }

    let mut update = RevisionRequestUpdate::status_only(request.id.clone(), rule.to);
    match action {
        RevisionAction::ProposePrice { amount } => {
            if amount <= 0 {
                return Err(WorkflowError::InvalidPrice);
            }
            update.price_proposal = Some(amount);
        }
        RevisionAction::StartBugFix | RevisionAction::Redeliver => {}
        RevisionAction::ApprovePrice => {
            let required = request
                .price_proposal
                .ok_or(WorkflowError::MissingPriceProposal)?;
            let balance = ctx.wallet_balance.ok_or(WorkflowError::BalanceUnknown)?;
            if balance < required {
                return Err(WorkflowError::InsufficientBalance { balance, required });
            }
        }
        RevisionAction::RejectRequest { reason } | RevisionAction::RejectModel { reason } => {
            update.rejection_reason = Some(validate_reason(&reason)?);
        }
        RevisionAction::DeliverModel { model_file } => {
            update.model_file = Some(model_file);
        }
        RevisionAction::ApproveModel { name, description } => {
            if name.trim().is_empty() || description.trim().is_empty() {
                return Err(WorkflowError::MissingApprovalDetails);
            }
            update.model_name = Some(name.trim().to_string());
            update.model_description = Some(description.trim().to_string());
        }
    }

    Ok(update)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
