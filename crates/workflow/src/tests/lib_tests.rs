use super::*;
use shared::domain::{CompanyRequestId, RequestId};

fn request(status: RevisionStatus, revision_type: RevisionType) -> RevisionRequest {
    RevisionRequest {
        id: RequestId::new("r-1"),
        status,
        revision_type,
        reason: "hinge clips through the housing".into(),
        price_proposal: None,
        rejection_reason: None,
        model_file: None,
        revision_files: Vec::new(),
        company_request_id: CompanyRequestId::new("cr-7"),
        created_date: "2024-05-01T10:00:00Z".parse().expect("timestamp"),
    }
}

fn priced_request(amount: i64) -> RevisionRequest {
    let mut r = request(RevisionStatus::PriceProposed, RevisionType::Modification);
    r.price_proposal = Some(amount);
    r
}

#[test]
fn designer_prices_a_modification() {
    let update = plan_transition(
        &request(RevisionStatus::Pending, RevisionType::Modification),
        Role::Designer,
        RevisionAction::ProposePrice { amount: 500 },
        GuardContext::default(),
    )
    .expect("legal transition");

    assert_eq!(update.status, RevisionStatus::PriceProposed);
    assert_eq!(update.price_proposal, Some(500));
    assert_eq!(update.rejection_reason, None);
}

#[test]
fn bug_fix_cannot_be_priced() {
    let err = plan_transition(
        &request(RevisionStatus::Pending, RevisionType::BugFix),
        Role::Designer,
        RevisionAction::ProposePrice { amount: 100 },
        GuardContext::default(),
    )
    .expect_err("bug fixes skip pricing");

    assert_eq!(
        err,
        WorkflowError::WrongRevisionType {
            revision_type: RevisionType::BugFix,
            action: ActionKind::ProposePrice,
        }
    );
}

#[test]
fn bug_fix_moves_straight_to_processing() {
    let update = plan_transition(
        &request(RevisionStatus::Pending, RevisionType::BugFix),
        Role::Designer,
        RevisionAction::StartBugFix,
        GuardContext::default(),
    )
    .expect("legal transition");

    assert_eq!(update.status, RevisionStatus::Processing);
    assert_eq!(update.price_proposal, None);
}

#[test]
fn non_positive_price_is_rejected() {
    for amount in [0, -50] {
        let err = plan_transition(
            &request(RevisionStatus::Pending, RevisionType::Modification),
            Role::Designer,
            RevisionAction::ProposePrice { amount },
            GuardContext::default(),
        )
        .expect_err("price must be positive");
        assert_eq!(err, WorkflowError::InvalidPrice);
    }
}

#[test]
fn company_approves_price_with_sufficient_balance() {
    let update = plan_transition(
        &priced_request(500),
        Role::Company,
        RevisionAction::ApprovePrice,
        GuardContext::with_balance(600),
    )
    .expect("balance covers the price");

    assert_eq!(update.status, RevisionStatus::Processing);
    // One-shot payload carries only the status for this transition.
    assert_eq!(update.price_proposal, None);
}

#[test]
fn approval_blocked_when_balance_below_price() {
    let err = plan_transition(
        &priced_request(500),
        Role::Company,
        RevisionAction::ApprovePrice,
        GuardContext::with_balance(300),
    )
    .expect_err("insufficient points");

    assert_eq!(
        err,
        WorkflowError::InsufficientBalance {
            balance: 300,
            required: 500,
        }
    );
}

#[test]
fn approval_requires_known_balance() {
    let err = plan_transition(
        &priced_request(500),
        Role::Company,
        RevisionAction::ApprovePrice,
        GuardContext::default(),
    )
    .expect_err("balance not yet fetched");
    assert_eq!(err, WorkflowError::BalanceUnknown);
}

#[test]
fn approval_requires_a_proposal_on_the_record() {
    let mut r = request(RevisionStatus::PriceProposed, RevisionType::Modification);
    r.price_proposal = None;
    let err = plan_transition(
        &r,
        Role::Company,
        RevisionAction::ApprovePrice,
        GuardContext::with_balance(1_000),
    )
    .expect_err("nothing to approve");
    assert_eq!(err, WorkflowError::MissingPriceProposal);
}

#[test]
fn rejection_requires_non_empty_reason() {
    for reason in ["", "   "] {
        let err = plan_transition(
            &priced_request(500),
            Role::Company,
            RevisionAction::RejectRequest {
                reason: reason.into(),
            },
            GuardContext::default(),
        )
        .expect_err("empty reason");
        assert_eq!(err, WorkflowError::ReasonRequired);
    }
}

#[test]
fn rejection_reason_is_capped_at_150_chars() {
    let long = "x".repeat(MAX_REJECTION_REASON_CHARS + 1);
    let err = plan_transition(
        &priced_request(500),
        Role::Company,
        RevisionAction::RejectRequest { reason: long },
        GuardContext::default(),
    )
    .expect_err("reason too long");
    assert_eq!(
        err,
        WorkflowError::ReasonTooLong {
            len: MAX_REJECTION_REASON_CHARS + 1,
        }
    );

    let exactly = "y".repeat(MAX_REJECTION_REASON_CHARS);
    let update = plan_transition(
        &priced_request(500),
        Role::Company,
        RevisionAction::RejectRequest { reason: exactly },
        GuardContext::default(),
    )
    .expect("150 chars is still legal");
    assert_eq!(update.status, RevisionStatus::Rejected);
}

#[test]
fn company_may_reject_straight_from_pending() {
    let update = plan_transition(
        &request(RevisionStatus::Pending, RevisionType::Modification),
        Role::Company,
        RevisionAction::RejectRequest {
            reason: "no longer needed".into(),
        },
        GuardContext::default(),
    )
    .expect("pending -> rejected shortcut");
    assert_eq!(update.status, RevisionStatus::Rejected);
    assert_eq!(update.rejection_reason.as_deref(), Some("no longer needed"));
}

#[test]
fn designer_delivers_from_processing() {
    let update = plan_transition(
        &request(RevisionStatus::Processing, RevisionType::Modification),
        Role::Designer,
        RevisionAction::DeliverModel {
            model_file: shared::domain::FileId::new("f-42"),
        },
        GuardContext::default(),
    )
    .expect("legal transition");
    assert_eq!(update.status, RevisionStatus::Delivered);
    assert_eq!(update.model_file, Some(shared::domain::FileId::new("f-42")));
}

#[test]
fn approving_a_model_needs_name_and_description() {
    let delivered = request(RevisionStatus::Delivered, RevisionType::Modification);

    let err = plan_transition(
        &delivered,
        Role::Company,
        RevisionAction::ApproveModel {
            name: "".into(),
            description: "usable".into(),
        },
        GuardContext::default(),
    )
    .expect_err("missing name");
    assert_eq!(err, WorkflowError::MissingApprovalDetails);

    let update = plan_transition(
        &delivered,
        Role::Company,
        RevisionAction::ApproveModel {
            name: "Valve housing v2".into(),
            description: "Final revision after hinge fix".into(),
        },
        GuardContext::default(),
    )
    .expect("legal transition");
    assert_eq!(update.status, RevisionStatus::Completed);
    assert_eq!(update.model_name.as_deref(), Some("Valve housing v2"));
}

#[test]
fn model_rejection_sends_request_back_to_rejected() {
    let update = plan_transition(
        &request(RevisionStatus::Delivered, RevisionType::BugFix),
        Role::Company,
        RevisionAction::RejectModel {
            reason: "texture seams are visible".into(),
        },
        GuardContext::default(),
    )
    .expect("legal transition");
    assert_eq!(update.status, RevisionStatus::Rejected);
}

#[test]
fn redeliver_reentry_is_bug_fix_only() {
    let update = plan_transition(
        &request(RevisionStatus::Rejected, RevisionType::BugFix),
        Role::Designer,
        RevisionAction::Redeliver,
        GuardContext::default(),
    )
    .expect("bug-fix rework re-entry");
    assert_eq!(update.status, RevisionStatus::Processing);

    let err = plan_transition(
        &request(RevisionStatus::Rejected, RevisionType::Modification),
        Role::Designer,
        RevisionAction::Redeliver,
        GuardContext::default(),
    )
    .expect_err("no general rejected -> processing cycle");
    assert_eq!(
        err,
        WorkflowError::WrongRevisionType {
            revision_type: RevisionType::Modification,
            action: ActionKind::Redeliver,
        }
    );
}

#[test]
fn actor_gating_is_enforced() {
    let err = plan_transition(
        &priced_request(500),
        Role::Designer,
        RevisionAction::ApprovePrice,
        GuardContext::with_balance(1_000),
    )
    .expect_err("only the company approves prices");
    assert_eq!(
        err,
        WorkflowError::RoleNotAllowed {
            role: Role::Designer,
            action: ActionKind::ApprovePrice,
        }
    );
}

#[test]
fn illegal_predecessor_states_are_refused() {
    let err = plan_transition(
        &request(RevisionStatus::Completed, RevisionType::Modification),
        Role::Designer,
        RevisionAction::DeliverModel {
            model_file: shared::domain::FileId::new("f-1"),
        },
        GuardContext::default(),
    )
    .expect_err("completed is terminal");
    assert_eq!(
        err,
        WorkflowError::IllegalTransition {
            from: RevisionStatus::Completed,
            action: ActionKind::DeliverModel,
        }
    );
}

#[test]
fn allowed_actions_match_the_transition_table() {
    assert_eq!(
        allowed_actions(
            RevisionStatus::Pending,
            Role::Designer,
            RevisionType::Modification
        ),
        vec![ActionKind::ProposePrice]
    );
    assert_eq!(
        allowed_actions(RevisionStatus::Pending, Role::Designer, RevisionType::BugFix),
        vec![ActionKind::StartBugFix]
    );
    assert_eq!(
        allowed_actions(
            RevisionStatus::PriceProposed,
            Role::Company,
            RevisionType::Modification
        ),
        vec![ActionKind::ApprovePrice, ActionKind::RejectRequest]
    );
    assert_eq!(
        allowed_actions(
            RevisionStatus::Delivered,
            Role::Company,
            RevisionType::AdditionalFeatures
        ),
        vec![ActionKind::ApproveModel, ActionKind::RejectModel]
    );
    assert_eq!(
        allowed_actions(
            RevisionStatus::Rejected,
            Role::Designer,
            RevisionType::BugFix
        ),
        vec![ActionKind::Redeliver]
    );
    // Admins observe; they never drive the workflow.
    assert!(allowed_actions(
        RevisionStatus::PriceProposed,
        Role::Admin,
        RevisionType::Modification
    )
    .is_empty());
    // Completed is terminal for everyone.
    assert!(allowed_actions(
        RevisionStatus::Completed,
        Role::Company,
        RevisionType::Modification
    )
    .is_empty());
}

#[test]
fn domain_predicates_agree_with_the_table() {
    let all_types = [
        RevisionType::BugFix,
        RevisionType::Modification,
        RevisionType::AdditionalFeatures,
    ];
    let all_roles = [Role::Admin, Role::Company, Role::Designer];
    let all_statuses = [
        RevisionStatus::Pending,
        RevisionStatus::PriceProposed,
        RevisionStatus::Processing,
        RevisionStatus::Delivered,
        RevisionStatus::Completed,
        RevisionStatus::Rejected,
    ];

    // Pricing starts the priced types; bug fixes start work directly.
    for revision_type in all_types {
        let actions = allowed_actions(RevisionStatus::Pending, Role::Designer, revision_type);
        if revision_type.is_priced() {
            assert_eq!(actions, vec![ActionKind::ProposePrice]);
        } else {
            assert_eq!(actions, vec![ActionKind::StartBugFix]);
        }
    }

    // A terminal status offers no action to anyone, for any type.
    for status in all_statuses {
        if !status.is_terminal() {
            continue;
        }
        for role in all_roles {
            for revision_type in all_types {
                assert!(allowed_actions(status, role, revision_type).is_empty());
            }
        }
    }
}
