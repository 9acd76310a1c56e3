//! Narrative recommendations from model outputs

use std::collections::HashSet;

use crate::engine::{ClassificationResult, GeometryResult, TextureResult};

use super::types::{Priority, Recommendation};

/// Used when the classifier reports no confidence at all
const DEFAULT_CLASSIFIER_CONFIDENCE: f32 = 0.7;

/// Build recommendations from the models that actually contributed.
///
/// A `None` model (skipped or failed) triggers no rules. Duplicates by text
/// are dropped, the rest are ordered by priority then confidence and
/// truncated to `max`.
pub fn recommend(
    geometry: Option<&GeometryResult>,
    texture: Option<&TextureResult>,
    classification: Option<&ClassificationResult>,
    max: usize,
) -> Vec<Recommendation> {
    let mut recs = Vec::new();

    if let Some(geometry) = geometry {
        let severity = geometry.wrinkle_severity;
        let confidence = (severity / 100.0).min(1.0);
        if severity > 50.0 {
            recs.push(Recommendation::new(
                "Consider anti-aging treatments like retinoids or peptides",
                confidence,
                Priority::High,
            ));
            recs.push(Recommendation::new(
                "Daily SPF 30+ sunscreen is crucial for wrinkle prevention",
                confidence,
                Priority::High,
            ));
        } else if severity > 25.0 {
            recs.push(Recommendation::new(
                "Use hyaluronic acid serum for hydration and fine line reduction",
                confidence,
                Priority::Medium,
            ));
        }
    }

    if let Some(texture) = texture {
        if texture.roughness > 0.7 {
            recs.push(Recommendation::new(
                "Exfoliate 2-3 times per week with gentle AHA/BHA",
                texture.roughness,
                Priority::High,
            ));
            recs.push(Recommendation::new(
                "Consider chemical peels for texture improvement",
                texture.roughness * 0.8,
                Priority::Medium,
            ));
        } else if texture.smoothness < 0.3 {
            recs.push(Recommendation::new(
                "Increase moisturizer use and consider humidifier",
                1.0 - texture.smoothness,
                Priority::Medium,
            ));
        }
    }

    if let Some(classification) = classification {
        let confidence = if classification.confidence > 0.0 {
            classification.confidence
        } else {
            DEFAULT_CLASSIFIER_CONFIDENCE
        };
        recs.extend(condition_advice(classification.skin_condition().0, confidence));
    }

    if recs.is_empty() {
        recs = vec![
            Recommendation::new("Maintain current skincare routine", 0.8, Priority::Low),
            Recommendation::new("Use sunscreen daily to protect skin health", 1.0, Priority::High),
            Recommendation::new("Stay hydrated and maintain healthy diet", 0.9, Priority::Medium),
        ];
    }

    let mut seen = HashSet::new();
    recs.retain(|r| seen.insert(r.text.clone()));
    recs.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| b.confidence.total_cmp(&a.confidence))
    });
    recs.truncate(max);
    recs
}

fn condition_advice(condition: &str, c: f32) -> Vec<Recommendation> {
    let pair = |first: (&str, f32, Priority), second: (&str, f32, Priority)| {
        vec![
            Recommendation::new(first.0, first.1, first.2),
            Recommendation::new(second.0, second.1, second.2),
        ]
    };

    match condition {
        "acne" => pair(
            ("Use salicylic acid or benzoyl peroxide treatments", c, Priority::High),
            ("Avoid touching face and change pillowcases frequently", c * 0.9, Priority::Medium),
        ),
        "oily" => pair(
            ("Use mattifying moisturizer and clay masks", c, Priority::Medium),
            ("Consider tea tree oil or niacinamide products", c * 0.8, Priority::Medium),
        ),
        "dry" => pair(
            ("Use rich moisturizers and avoid hot showers", c, Priority::High),
            ("Apply facial oil before moisturizer", c * 0.85, Priority::Medium),
        ),
        "pigmentation" => pair(
            ("Use vitamin C serum and sunscreen daily", c, Priority::High),
            ("Consider professional treatments for dark spots", c * 0.7, Priority::Low),
        ),
        "sensitive" => pair(
            ("Use fragrance-free, hypoallergenic products", c, Priority::High),
            ("Patch test new products before full use", c * 0.9, Priority::High),
        ),
        _ => Vec::new(),
    }
}
