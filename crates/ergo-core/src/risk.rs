//! Risk classification rules, one pure function per report family.
//!
//! Every rule is total: missing or unrecognised inputs degrade to the most
//! permissive bucket of the family instead of failing the cycle.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{RawRecord, ReportType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    NegligibleRisk,
    Low,
    Medium,
    High,
    VeryHighRisk,
    Moderate,
    SlightlyIncreased,
    SubstantiallyIncreased,
    Safe,
    Hazardous,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::NegligibleRisk => "NEGLIGIBLE_RISK",
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::VeryHighRisk => "VERY_HIGH_RISK",
            RiskLevel::Moderate => "MODERATE",
            RiskLevel::SlightlyIncreased => "SLIGHTLY_INCREASED",
            RiskLevel::SubstantiallyIncreased => "SUBSTANTIALLY_INCREASED",
            RiskLevel::Safe => "SAFE",
            RiskLevel::Hazardous => "HAZARDOUS",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        const LEVELS: [RiskLevel; 10] = [
            RiskLevel::NegligibleRisk,
            RiskLevel::Low,
            RiskLevel::Medium,
            RiskLevel::High,
            RiskLevel::VeryHighRisk,
            RiskLevel::Moderate,
            RiskLevel::SlightlyIncreased,
            RiskLevel::SubstantiallyIncreased,
            RiskLevel::Safe,
            RiskLevel::Hazardous,
        ];
        let label = label.trim();
        LEVELS
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type RiskRule = fn(&RawRecord) -> RiskLevel;

/// Fixed dispatch table from report family to its rule.
pub fn rule_for(report_type: ReportType) -> RiskRule {
    match report_type {
        ReportType::Reba => reba_risk,
        ReportType::KimMho => kim_mho_risk,
        ReportType::KimPp => kim_push_pull_risk,
        ReportType::Niosh => niosh_risk,
        ReportType::StrainIndex => strain_index_risk,
    }
}

pub fn classify(report_type: ReportType, record: &RawRecord) -> RiskLevel {
    rule_for(report_type)(record)
}

const REBA_NEGLIGIBLE_MAX: f64 = 1.0;
const REBA_LOW_MAX: f64 = 3.0;
const REBA_MEDIUM_MAX: f64 = 7.0;
const REBA_HIGH_MAX: f64 = 10.0;

pub fn reba_risk(record: &RawRecord) -> RiskLevel {
    let Some(score) = record.number("score_seconds") else {
        return RiskLevel::Low;
    };
    // LOW is tested before NEGLIGIBLE_RISK; scores at or below 1 stay LOW.
    if score <= REBA_LOW_MAX {
        RiskLevel::Low
    } else if score <= REBA_NEGLIGIBLE_MAX {
        RiskLevel::NegligibleRisk
    } else if score <= REBA_MEDIUM_MAX {
        RiskLevel::Medium
    } else if score <= REBA_HIGH_MAX {
        RiskLevel::High
    } else {
        RiskLevel::VeryHighRisk
    }
}

const KIM_PP_LOW_LIMIT: f64 = 10.0;
const KIM_PP_MODERATE_LIMIT: f64 = 100.0;

pub fn kim_push_pull_risk(record: &RawRecord) -> RiskLevel {
    match record.number("score") {
        None => RiskLevel::Low,
        Some(score) if score < KIM_PP_LOW_LIMIT => RiskLevel::Low,
        Some(score) if score < KIM_PP_MODERATE_LIMIT => RiskLevel::Moderate,
        Some(_) => RiskLevel::High,
    }
}

const STRAIN_INDEX_SAFE_LIMIT: f64 = 10.0;

pub fn strain_index_risk(record: &RawRecord) -> RiskLevel {
    let (Some(left), Some(right)) = (
        record.number("score_left_rsi"),
        record.number("score_right_rsi"),
    ) else {
        return RiskLevel::Safe;
    };
    if left < STRAIN_INDEX_SAFE_LIMIT && right < STRAIN_INDEX_SAFE_LIMIT {
        RiskLevel::Safe
    } else {
        RiskLevel::Hazardous
    }
}

const NIOSH_LEVELS: [RiskLevel; 3] = [RiskLevel::Low, RiskLevel::Moderate, RiskLevel::High];

/// NIOSH records already carry their classification; only relabel it.
pub fn niosh_risk(record: &RawRecord) -> RiskLevel {
    record
        .text("risk")
        .and_then(RiskLevel::from_label)
        .filter(|level| NIOSH_LEVELS.contains(level))
        .unwrap_or(RiskLevel::Low)
}

const KIM_MHO_LOW_LIMIT: f64 = 20.0;
const KIM_MHO_SLIGHTLY_INCREASED_LIMIT: f64 = 50.0;
const KIM_MHO_SUBSTANTIALLY_INCREASED_LIMIT: f64 = 100.0;

const KIM_MHO_INTENSITIES: [&str; 6] = [
    "VERY_LOW",
    "MODERATE",
    "HIGH",
    "VERY_HIGH",
    "PEAK",
    "POWERFUL_HITTING",
];

const KIM_MHO_HOLDING_FREQUENCIES: [f64; 3] = [15.0, 30.0, 60.0];
const KIM_MHO_MOVING_FREQUENCIES: [f64; 5] = [4.0, 15.0, 30.0, 60.0, 90.0];

const KIM_MHO_HOLDING_MATRIX: [[Option<f64>; 3]; 6] = [
    [Some(1.5), Some(3.0), Some(5.5)],
    [Some(2.5), Some(4.5), Some(9.0)],
    [Some(3.5), Some(7.0), Some(14.0)],
    [Some(5.5), Some(11.0), Some(22.0)],
    [Some(35.0), Some(100.0), Some(100.0)],
    [None, None, None],
];

const KIM_MHO_MOVING_MATRIX: [[Option<f64>; 5]; 6] = [
    [Some(0.5), Some(1.0), Some(2.5), Some(5.0), Some(7.0)],
    [Some(0.5), Some(2.0), Some(4.0), Some(7.5), Some(11.0)],
    [Some(1.0), Some(3.0), Some(6.0), Some(12.0), Some(18.0)],
    [Some(1.5), Some(5.0), Some(10.0), Some(19.0), None],
    [Some(8.0), Some(30.0), Some(100.0), Some(100.0), Some(100.0)],
    [Some(8.0), Some(30.0), None, None, None],
];

const KIM_MHO_RATING_POINTS: [(&str, &[(&str, f64)]); 5] = [
    (
        "force_transfer",
        &[("OPTIMUM", 0.0), ("RESTRICTED", 2.0), ("HINDERED", 4.0)],
    ),
    (
        "arm_posture",
        &[
            ("GOOD", 0.0),
            ("RESTRICTED", 1.0),
            ("UNFAVOURABLE", 2.0),
            ("POOR", 3.0),
        ],
    ),
    (
        "work_conditions",
        &[("GOOD", 0.0), ("RESTRICTED", 1.0), ("UNFAVOURABLE", 2.0)],
    ),
    (
        "temporal_distribution",
        &[("GOOD", 0.0), ("RESTRICTED", 2.0), ("UNFAVOURABLE", 4.0)],
    ),
    (
        "body_posture",
        &[
            ("ALTERNATED_SITTING_STANDING", 0.0),
            ("OCCASIONAL_WALKING", 2.0),
            ("NO_WALKING", 4.0),
            ("SEVERELY_INCLINED", 6.0),
        ],
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    fn prefix(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

pub fn kim_mho_risk(record: &RawRecord) -> RiskLevel {
    let Some(duration) = record.number("duration") else {
        return RiskLevel::Low;
    };

    let total = kim_mho_score(record) * duration;
    if total < KIM_MHO_LOW_LIMIT {
        RiskLevel::Low
    } else if total < KIM_MHO_SLIGHTLY_INCREASED_LIMIT {
        RiskLevel::SlightlyIncreased
    } else if total < KIM_MHO_SUBSTANTIALLY_INCREASED_LIMIT {
        RiskLevel::SubstantiallyIncreased
    } else {
        RiskLevel::High
    }
}

/// Composite score before the duration multiplier.
pub fn kim_mho_score(record: &RawRecord) -> f64 {
    let rating: f64 = KIM_MHO_RATING_POINTS
        .iter()
        .filter_map(|(field, points)| {
            let value = record.text(field)?;
            points
                .iter()
                .find(|(label, _)| *label == value)
                .map(|(_, p)| *p)
        })
        .sum();

    let left = force_exertion_points(record, Side::Left);
    let right = force_exertion_points(record, Side::Right);
    rating + left.max(right)
}

pub fn force_exertion_points(record: &RawRecord, side: Side) -> f64 {
    let prefix = side.prefix();
    let intensity = record.text(&format!("{prefix}_force_intensity"));
    let frequency = record.number(&format!("{prefix}_force_frequency"));
    let force_type = record.text(&format!("{prefix}_force_type"));
    let (Some(intensity), Some(frequency), Some(force_type)) = (intensity, frequency, force_type)
    else {
        return 0.0;
    };

    let Some(row) = KIM_MHO_INTENSITIES.iter().position(|i| *i == intensity) else {
        return 0.0;
    };

    let cell = match force_type {
        "HOLDING" => lookup(&KIM_MHO_HOLDING_MATRIX[row], &KIM_MHO_HOLDING_FREQUENCIES, frequency),
        "MOVING" => lookup(&KIM_MHO_MOVING_MATRIX[row], &KIM_MHO_MOVING_FREQUENCIES, frequency),
        _ => None,
    };
    cell.unwrap_or(0.0)
}

fn lookup(row: &[Option<f64>], frequencies: &[f64], frequency: f64) -> Option<f64> {
    let column = frequencies.iter().position(|f| *f >= frequency)?;
    row.get(column).copied().flatten()
}
