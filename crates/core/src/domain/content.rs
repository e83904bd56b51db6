use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Department {
    Instrument,
    #[serde(rename = "Turbo-Machinery")]
    TurboMachinery,
    Mechanical,
    Electrical,
    #[serde(rename = "HVAC")]
    Hvac,
    Production,
    Lab,
    Inspection,
    Painting,
    Civil,
    #[serde(rename = "Condition Monitoring")]
    ConditionMonitoring,
    Reliability,
    Telecom,
    Safety,
    Subsea,
}

impl Department {
    pub const ALL: [Department; 15] = [
        Self::Instrument,
        Self::TurboMachinery,
        Self::Mechanical,
        Self::Electrical,
        Self::Hvac,
        Self::Production,
        Self::Lab,
        Self::Inspection,
        Self::Painting,
        Self::Civil,
        Self::ConditionMonitoring,
        Self::Reliability,
        Self::Telecom,
        Self::Safety,
        Self::Subsea,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instrument => "Instrument",
            Self::TurboMachinery => "Turbo-Machinery",
            Self::Mechanical => "Mechanical",
            Self::Electrical => "Electrical",
            Self::Hvac => "HVAC",
            Self::Production => "Production",
            Self::Lab => "Lab",
            Self::Inspection => "Inspection",
            Self::Painting => "Painting",
            Self::Civil => "Civil",
            Self::ConditionMonitoring => "Condition Monitoring",
            Self::Reliability => "Reliability",
            Self::Telecom => "Telecom",
            Self::Safety => "Safety",
            Self::Subsea => "Subsea",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let key = value.trim();
        Self::ALL.into_iter().find(|department| department.as_str().eq_ignore_ascii_case(key))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criticality {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    #[serde(rename = "Very High")]
    VeryHigh,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Likelihood {
    Rare,
    Unlikely,
    Possible,
    Likely,
    #[serde(rename = "Almost Certain")]
    AlmostCertain,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskItem {
    pub severity: Severity,
    pub likelihood: Likelihood,
    #[serde(default)]
    pub justification: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub people: RiskItem,
    pub asset: RiskItem,
    pub environment: RiskItem,
    pub reputation: RiskItem,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MitigationAction {
    pub action_no: u32,
    pub action: String,
    pub owner: String,
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub comments: String,
}

/// Reference to an uploaded file; the bytes live with the storage collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub file_name: String,
    pub file_type: String,
    pub file_size: Option<u64>,
    pub file_path: String,
}

/// Everything the initiator fills in. The lifecycle engine validates and copies
/// this block but never interprets it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferralContent {
    pub initiator_name: String,
    pub job_title: String,
    pub department: Department,
    #[serde(default)]
    pub work_order_numbers: Vec<String>,
    #[serde(default)]
    pub equipment_full_codes: Vec<String>,
    pub equipment_description: String,
    pub equipment_safety_criticality: Option<Criticality>,
    pub task_criticality: Option<Criticality>,
    pub deferral_request_date: NaiveDate,
    pub current_lafd: Option<NaiveDate>,
    pub deferred_to_new_lafd: NaiveDate,
    pub description: String,
    pub justification: String,
    pub consequence: String,
    pub risk_assessment: Option<RiskAssessment>,
    #[serde(default)]
    pub mitigations: Vec<MitigationAction>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid `{field}`: {reason}")]
pub struct ContentError {
    pub field: &'static str,
    pub reason: String,
}

impl ContentError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self { field, reason: reason.into() }
    }
}

impl DeferralContent {
    pub fn validate(&self) -> Result<(), ContentError> {
        let required_text = [
            ("initiator_name", &self.initiator_name),
            ("job_title", &self.job_title),
            ("equipment_description", &self.equipment_description),
            ("description", &self.description),
            ("justification", &self.justification),
            ("consequence", &self.consequence),
        ];
        for (field, value) in required_text {
            if value.trim().is_empty() {
                return Err(ContentError::new(field, "must not be blank"));
            }
        }

        if let Some(current) = self.current_lafd {
            if self.deferred_to_new_lafd < current {
                return Err(ContentError::new(
                    "deferred_to_new_lafd",
                    format!("{} is earlier than the current LAFD {current}", self.deferred_to_new_lafd),
                ));
            }
        }

        let mut action_numbers = BTreeSet::new();
        for mitigation in &self.mitigations {
            if !action_numbers.insert(mitigation.action_no) {
                return Err(ContentError::new(
                    "mitigations",
                    format!("action number {} is used more than once", mitigation.action_no),
                ));
            }
            if mitigation.action.trim().is_empty() {
                return Err(ContentError::new(
                    "mitigations",
                    format!("action {} has no description", mitigation.action_no),
                ));
            }
        }

        if self.attachments.iter().any(|attachment| attachment.file_path.trim().is_empty()) {
            return Err(ContentError::new("attachments", "every attachment needs a stored path"));
        }

        Ok(())
    }

    /// Names of the top-level fields that differ from `other`, in declaration order.
    pub fn changed_fields(&self, other: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        macro_rules! diff {
            ($($field:ident),+ $(,)?) => {
                $(if self.$field != other.$field {
                    changed.push(stringify!($field));
                })+
            };
        }
        diff!(
            initiator_name,
            job_title,
            department,
            work_order_numbers,
            equipment_full_codes,
            equipment_description,
            equipment_safety_criticality,
            task_criticality,
            deferral_request_date,
            current_lafd,
            deferred_to_new_lafd,
            description,
            justification,
            consequence,
            risk_assessment,
            mitigations,
            attachments,
        );
        changed
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::NaiveDate;

    use super::{Criticality, DeferralContent, Department, MitigationAction};

    pub(crate) fn content() -> DeferralContent {
        DeferralContent {
            initiator_name: "Amal Haddad".to_string(),
            job_title: "Instrument Engineer".to_string(),
            department: Department::Instrument,
            work_order_numbers: vec!["WO-88412".to_string()],
            equipment_full_codes: vec!["PT-1101A".to_string()],
            equipment_description: "Export gas pressure transmitter".to_string(),
            equipment_safety_criticality: Some(Criticality::High),
            task_criticality: Some(Criticality::Medium),
            deferral_request_date: date(2026, 3, 2),
            current_lafd: Some(date(2026, 3, 15)),
            deferred_to_new_lafd: date(2026, 5, 30),
            description: "Annual calibration of PT-1101A".to_string(),
            justification: "Spare transmitter not yet delivered".to_string(),
            consequence: "Calibration drift beyond tolerance".to_string(),
            risk_assessment: None,
            mitigations: vec![MitigationAction {
                action_no: 1,
                action: "Daily cross-check against PT-1101B".to_string(),
                owner: "Shift supervisor".to_string(),
                date: Some(date(2026, 3, 16)),
                comments: String::new(),
            }],
            attachments: Vec::new(),
        }
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid fixture date")
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::fixtures::content;
    use super::{Department, MitigationAction};

    #[test]
    fn well_formed_content_validates() {
        assert_eq!(content().validate(), Ok(()));
    }

    #[test]
    fn blank_justification_is_rejected_by_field() {
        let mut content = content();
        content.justification = "   ".to_string();

        let error = content.validate().expect_err("blank justification");
        assert_eq!(error.field, "justification");
    }

    #[test]
    fn new_lafd_cannot_precede_current_lafd() {
        let mut content = content();
        content.deferred_to_new_lafd = NaiveDate::from_ymd_opt(2026, 3, 1).expect("date");

        let error = content.validate().expect_err("lafd moved backwards");
        assert_eq!(error.field, "deferred_to_new_lafd");
    }

    #[test]
    fn mitigation_numbers_must_be_unique() {
        let mut content = content();
        let duplicate =
            MitigationAction { action: "Second check".to_string(), ..content.mitigations[0].clone() };
        content.mitigations.push(duplicate);

        let error = content.validate().expect_err("duplicate action number");
        assert_eq!(error.field, "mitigations");
    }

    #[test]
    fn changed_fields_lists_only_edited_fields() {
        let original = content();
        let mut edited = original.clone();
        edited.consequence = "Loss of export pressure indication".to_string();
        edited.department = Department::Mechanical;

        assert_eq!(edited.changed_fields(&original), vec!["department", "consequence"]);
        assert!(original.changed_fields(&original).is_empty());
    }

    #[test]
    fn departments_use_display_spelling_on_the_wire() {
        let encoded = serde_json::to_string(&Department::ConditionMonitoring).expect("encode");
        assert_eq!(encoded, "\"Condition Monitoring\"");
        assert_eq!(Department::parse("turbo-machinery"), Some(Department::TurboMachinery));
    }
}
