//! Skin concerns derived from the metric vector

use std::collections::BTreeMap;

use crate::calibrator::CalibratedConfidence;

use super::types::{Priority, SkinConcern, SkinMetrics};

pub const THRESHOLD_HIGH: f32 = 7.0;
pub const THRESHOLD_MEDIUM: f32 = 4.0;

struct AxisRule {
    axis: &'static str,
    high: (&'static str, Priority),
    medium: (&'static str, Priority),
}

const RULES: [AxisRule; 8] = [
    AxisRule {
        axis: "wrinkles",
        high: ("Significant fine lines and wrinkles detected", Priority::High),
        medium: ("Moderate fine lines present", Priority::Medium),
    },
    AxisRule {
        axis: "spots",
        high: ("Significant hyperpigmentation and dark spots detected", Priority::High),
        medium: ("Moderate hyperpigmentation present", Priority::Medium),
    },
    AxisRule {
        axis: "pores",
        high: (
            "Enlarged pores detected, may indicate oily skin or clogged pores",
            Priority::Medium,
        ),
        medium: ("Visible pores present", Priority::Low),
    },
    AxisRule {
        axis: "texture",
        high: ("Uneven and rough skin texture detected", Priority::High),
        medium: ("Skin texture could be improved", Priority::Medium),
    },
    AxisRule {
        axis: "red_areas",
        high: (
            "Significant redness and inflammation detected, possible rosacea or sensitivity",
            Priority::High,
        ),
        medium: ("Mild redness present", Priority::Medium),
    },
    AxisRule {
        axis: "uv_spots",
        high: (
            "Significant sun damage detected, may develop into visible spots",
            Priority::High,
        ),
        medium: ("Moderate sun damage present", Priority::Medium),
    },
    AxisRule {
        axis: "brown_spots",
        high: ("Brown spots and age spots detected", Priority::High),
        medium: ("Mild brown spots present", Priority::Medium),
    },
    AxisRule {
        axis: "porphyrins",
        high: ("High bacterial activity detected, may indicate acne risk", Priority::High),
        medium: ("Moderate bacterial activity present", Priority::Medium),
    },
];

/// Turn every axis at or above the medium threshold into a concern.
///
/// Axes with a calibration entry carry it, and are dropped when the
/// calibrated confidence is below the concern's reporting threshold.
pub fn detect_concerns(
    metrics: &SkinMetrics,
    calibrations: &BTreeMap<&'static str, CalibratedConfidence>,
) -> Vec<SkinConcern> {
    let values: BTreeMap<&str, f32> = metrics.axes().collect();

    RULES
        .iter()
        .filter_map(|rule| {
            let severity = values.get(rule.axis).copied()?;
            let (description, priority) = if severity >= THRESHOLD_HIGH {
                rule.high
            } else if severity >= THRESHOLD_MEDIUM {
                rule.medium
            } else {
                return None;
            };

            let calibration = calibrations.get(rule.axis).copied();
            if matches!(calibration, Some(c) if !c.should_report) {
                return None;
            }

            Some(SkinConcern {
                kind: rule.axis.to_string(),
                severity,
                description: description.to_string(),
                priority,
                calibration,
            })
        })
        .collect()
}
