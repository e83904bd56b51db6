use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::content::Department;
use crate::domain::signature::SignatureRole;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    User,
    Reliability,
    Approver,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Reliability => "reliability",
            Self::Approver => "approver",
            Self::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "reliability" => Some(Self::Reliability),
            "approver" => Some(Self::Approver),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Roles allowed to triage submitted deferrals.
    pub fn can_review(&self) -> bool {
        matches!(self, Self::Reliability | Self::Admin)
    }
}

/// Caller identity as resolved by the directory at request time.
///
/// Signatures copy the contact fields out of this value, so later profile edits
/// never reach signatures that were already recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub department: Option<Department>,
    pub position: Option<String>,
    pub role: UserRole,
    #[serde(default)]
    pub signature_roles: BTreeSet<SignatureRole>,
}

impl Identity {
    pub fn holds(&self, role: SignatureRole) -> bool {
        self.signature_roles.contains(&role)
    }
}
