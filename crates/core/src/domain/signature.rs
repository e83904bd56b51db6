use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::content::Department;
use crate::domain::user::UserId;

/// Approver roles that can be required to sign a deferral.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureRole {
    DepartmentHead,
    MaintSupportReliabilityGm,
    DisciplineTa,
    AdHoc,
    MaintenanceResponsibleGm,
    Sod,
    Dfgm,
}

impl SignatureRole {
    pub const ALL: [SignatureRole; 7] = [
        Self::DepartmentHead,
        Self::MaintSupportReliabilityGm,
        Self::DisciplineTa,
        Self::AdHoc,
        Self::MaintenanceResponsibleGm,
        Self::Sod,
        Self::Dfgm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DepartmentHead => "department_head",
            Self::MaintSupportReliabilityGm => "maint_support_reliability_gm",
            Self::DisciplineTa => "discipline_ta",
            Self::AdHoc => "ad_hoc",
            Self::MaintenanceResponsibleGm => "maintenance_responsible_gm",
            Self::Sod => "sod",
            Self::Dfgm => "dfgm",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let key = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|role| role.as_str() == key)
    }
}

impl std::fmt::Display for SignatureRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("signature role `{0}` was selected more than once")]
pub struct DuplicateRole(pub SignatureRole);

/// Insertion-ordered set of roles whose holders must sign.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<SignatureRole>", into = "Vec<SignatureRole>")]
pub struct RequiredSignatures(Vec<SignatureRole>);

impl RequiredSignatures {
    pub fn new(roles: Vec<SignatureRole>) -> Result<Self, DuplicateRole> {
        let mut seen = Vec::with_capacity(roles.len());
        for role in roles {
            if seen.contains(&role) {
                return Err(DuplicateRole(role));
            }
            seen.push(role);
        }
        Ok(Self(seen))
    }

    pub fn contains(&self, role: SignatureRole) -> bool {
        self.0.contains(&role)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = SignatureRole> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[SignatureRole] {
        &self.0
    }
}

impl TryFrom<Vec<SignatureRole>> for RequiredSignatures {
    type Error = DuplicateRole;

    fn try_from(value: Vec<SignatureRole>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RequiredSignatures> for Vec<SignatureRole> {
    fn from(value: RequiredSignatures) -> Self {
        value.0
    }
}

/// One role's approval. Never mutated after it is recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub role: SignatureRole,
    pub signer_id: UserId,
    pub signer_name: String,
    pub signer_email: String,
    pub signer_department: Option<Department>,
    pub signer_position: Option<String>,
    pub signed_at: DateTime<Utc>,
    pub comments: Option<String>,
}

/// Collected signatures keyed by role; a role can only ever hold one entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureSet(BTreeMap<SignatureRole, Signature>);

impl SignatureSet {
    pub fn get(&self, role: SignatureRole) -> Option<&Signature> {
        self.0.get(&role)
    }

    pub fn contains(&self, role: SignatureRole) -> bool {
        self.0.contains_key(&role)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn roles(&self) -> impl Iterator<Item = SignatureRole> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signature> {
        self.0.values()
    }

    /// Only the ledger adds entries, after it has checked the role is free.
    pub(crate) fn insert_new(&mut self, signature: Signature) {
        self.0.entry(signature.role).or_insert(signature);
    }
}
