//! Signature ledger: decides how a deferral's approval state evolves as
//! role-holders sign.
//!
//! Everything here is a pure function of the required role set, the signatures
//! already collected and the new signature. No storage, no clock.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::deferral::DeferralStatus;
use crate::domain::signature::{RequiredSignatures, Signature, SignatureRole, SignatureSet};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature role `{role}` is not required for this deferral")]
    NotRequired { role: SignatureRole },
    #[error("signature role `{role}` has already signed this deferral")]
    AlreadySigned { role: SignatureRole },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureOutcome {
    pub signatures: SignatureSet,
    pub status: DeferralStatus,
    /// True only for the call whose signature closed the required set.
    pub completed_now: bool,
}

/// Validates and appends `signature`, returning the new signature set and status.
pub fn record_signature(
    required: &RequiredSignatures,
    signatures: &SignatureSet,
    signature: Signature,
) -> Result<SignatureOutcome, SignatureError> {
    let role = signature.role;
    if !required.contains(role) {
        return Err(SignatureError::NotRequired { role });
    }
    if signatures.contains(role) {
        return Err(SignatureError::AlreadySigned { role });
    }

    let was_complete = is_complete(required, signatures);
    let mut updated = signatures.clone();
    updated.insert_new(signature);

    let complete = is_complete(required, &updated);
    let status =
        if complete { DeferralStatus::FullyApproved } else { DeferralStatus::PartiallyApproved };

    Ok(SignatureOutcome { signatures: updated, status, completed_now: complete && !was_complete })
}

/// `required ⊆ signed`, and an empty requirement never counts as complete.
pub fn is_complete(required: &RequiredSignatures, signatures: &SignatureSet) -> bool {
    !required.is_empty() && required.iter().all(|role| signatures.contains(role))
}

/// Required roles without a signature, in selection order.
pub fn pending_roles(required: &RequiredSignatures, signatures: &SignatureSet) -> Vec<SignatureRole> {
    required.iter().filter(|role| !signatures.contains(*role)).collect()
}

/// Checks the signature invariants a persisted deferral must always satisfy:
/// signed roles are a subset of the required roles, and the status reports
/// `fully_approved` exactly when the required set is complete.
pub fn invariants_hold(
    status: DeferralStatus,
    required: &RequiredSignatures,
    signatures: &SignatureSet,
) -> bool {
    let subset = signatures.roles().all(|role| required.contains(role));
    let complete = is_complete(required, signatures);
    subset && (status == DeferralStatus::FullyApproved) == complete
}


#[cfg(test)]
mod tests {
    use super::fixtures::signature;
    use super::{invariants_hold, is_complete, pending_roles, record_signature, SignatureError};
    use crate::domain::deferral::DeferralStatus;
    use crate::domain::signature::{RequiredSignatures, SignatureRole, SignatureSet};

    fn required(roles: &[SignatureRole]) -> RequiredSignatures {
        RequiredSignatures::new(roles.to_vec()).expect("unique roles")
    }

    fn sign_all(required: &RequiredSignatures, order: &[SignatureRole]) -> (SignatureSet, Vec<bool>) {
        let mut signatures = SignatureSet::default();
        let mut completions = Vec::new();
        for role in order {
            let outcome =
                record_signature(required, &signatures, signature(*role)).expect("sign in order");
            assert!(invariants_hold(outcome.status, required, &outcome.signatures));
            completions.push(outcome.completed_now);
            signatures = outcome.signatures;
        }
        (signatures, completions)
    }

    #[test]
    fn first_of_two_signatures_is_partial() {
        let required = required(&[SignatureRole::DepartmentHead, SignatureRole::Dfgm]);
        let outcome =
            record_signature(&required, &SignatureSet::default(), signature(SignatureRole::Dfgm))
                .expect("dfgm signs");

        assert_eq!(outcome.status, DeferralStatus::PartiallyApproved);
        assert!(!outcome.completed_now);
        assert_eq!(outcome.signatures.len(), 1);
        assert_eq!(pending_roles(&required, &outcome.signatures), vec![SignatureRole::DepartmentHead]);
    }

    #[test]
    fn last_signature_completes_the_set() {
        let required = required(&[SignatureRole::DepartmentHead, SignatureRole::Dfgm]);
        let (signatures, completions) =
            sign_all(&required, &[SignatureRole::DepartmentHead, SignatureRole::Dfgm]);

        assert!(is_complete(&required, &signatures));
        assert_eq!(completions, vec![false, true]);
    }

    #[test]
    fn single_required_role_completes_immediately() {
        let required = required(&[SignatureRole::Sod]);
        let outcome =
            record_signature(&required, &SignatureSet::default(), signature(SignatureRole::Sod))
                .expect("sod signs");

        assert_eq!(outcome.status, DeferralStatus::FullyApproved);
        assert!(outcome.completed_now);
    }

    #[test]
    fn unrequired_role_is_rejected_without_touching_the_set() {
        let required = required(&[SignatureRole::DepartmentHead]);
        let error =
            record_signature(&required, &SignatureSet::default(), signature(SignatureRole::AdHoc))
                .expect_err("ad hoc not required");

        assert_eq!(error, SignatureError::NotRequired { role: SignatureRole::AdHoc });
    }

    #[test]
    fn second_signature_for_same_role_is_rejected() {
        let required = required(&[SignatureRole::DepartmentHead, SignatureRole::Dfgm]);
        let first = record_signature(
            &required,
            &SignatureSet::default(),
            signature(SignatureRole::DepartmentHead),
        )
        .expect("first signature");

        let error = record_signature(
            &required,
            &first.signatures,
            signature(SignatureRole::DepartmentHead),
        )
        .expect_err("re-sign must fail");

        assert_eq!(error, SignatureError::AlreadySigned { role: SignatureRole::DepartmentHead });
        assert_eq!(first.signatures.len(), 1);
    }

    #[test]
    fn signing_order_does_not_change_the_result() {
        let roles = [SignatureRole::DepartmentHead, SignatureRole::DisciplineTa, SignatureRole::Sod];
        let required = required(&roles);
        let orders = [
            [roles[0], roles[1], roles[2]],
            [roles[0], roles[2], roles[1]],
            [roles[1], roles[0], roles[2]],
            [roles[1], roles[2], roles[0]],
            [roles[2], roles[0], roles[1]],
            [roles[2], roles[1], roles[0]],
        ];

        let (baseline, _) = sign_all(&required, &orders[0]);
        for order in &orders[1..] {
            let (signatures, completions) = sign_all(&required, order);
            assert_eq!(signatures, baseline, "order {order:?}");
            assert_eq!(completions, vec![false, false, true], "order {order:?}");
        }
    }

    #[test]
    fn empty_requirement_is_never_complete() {
        let required = RequiredSignatures::default();
        assert!(!is_complete(&required, &SignatureSet::default()));
        assert!(!invariants_hold(DeferralStatus::FullyApproved, &required, &SignatureSet::default()));
        assert!(invariants_hold(DeferralStatus::PendingSignatures, &required, &SignatureSet::default()));
    }

    #[test]
    fn recorded_signature_keeps_the_snapshot_it_was_given() {
        let required = required(&[SignatureRole::Dfgm]);
        let mut snapshot = signature(SignatureRole::Dfgm);
        snapshot.signer_position = Some("Deputy Field GM".to_string());

        let outcome = record_signature(&required, &SignatureSet::default(), snapshot.clone())
            .expect("dfgm signs");

        assert_eq!(outcome.signatures.get(SignatureRole::Dfgm), Some(&snapshot));
    }
}
