//! Turns a raw (label, confidence) pair into the record returned to callers.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::catalog::{DiseaseClass, FALLBACK_RECOMMENDATIONS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn classify(is_healthy: bool, confidence: f32) -> Self {
        if is_healthy {
            Severity::None
        } else if confidence >= 0.9 {
            Severity::High
        } else if confidence >= 0.7 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

/// Which kind of model produced a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelSource {
    #[serde(rename = "tomato_disease_model")]
    Trained,
    #[serde(rename = "demo_mode")]
    Placeholder,
}

/// Keys kept for clients written against the first version of the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyFields {
    pub maladie: String,
    pub confiance: f32,
    pub recommandations: Vec<String>,
    pub arroser: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    #[serde(flatten)]
    pub legacy: LegacyFields,
    pub prediction: String,
    pub prediction_fr: String,
    pub confidence: f32,
    pub disease_detected: bool,
    pub severity: Severity,
    pub recommendations: Vec<String>,
    pub should_water: bool,
    pub timestamp: DateTime<Local>,
    pub model_used: ModelSource,
}

pub fn annotate(label: &str, confidence: f32, source: ModelSource) -> PredictionResult {
    let class = DiseaseClass::from_label(label);

    let prediction_fr = class
        .map(|c| c.display_name_fr().to_string())
        .unwrap_or_else(|| label.to_string());
    let is_healthy = class.map(DiseaseClass::is_healthy).unwrap_or(false);
    let should_water = class.map(DiseaseClass::requires_watering).unwrap_or(false);
    let recommendations: Vec<String> = class
        .map(DiseaseClass::recommendations)
        .unwrap_or(FALLBACK_RECOMMENDATIONS)
        .iter()
        .map(|s| s.to_string())
        .collect();

    PredictionResult {
        legacy: LegacyFields {
            maladie: label.to_string(),
            confiance: confidence,
            recommandations: recommendations.clone(),
            arroser: should_water,
        },
        prediction: label.to_string(),
        prediction_fr,
        confidence,
        disease_detected: !is_healthy,
        severity: Severity::classify(is_healthy, confidence),
        recommendations,
        should_water,
        timestamp: Local::now(),
        model_used: source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_thresholds() {
        assert_eq!(Severity::classify(true, 0.99), Severity::None);
        assert_eq!(Severity::classify(true, 0.1), Severity::None);
        assert_eq!(Severity::classify(false, 0.9), Severity::High);
        assert_eq!(Severity::classify(false, 0.97), Severity::High);
        assert_eq!(Severity::classify(false, 0.89), Severity::Medium);
        assert_eq!(Severity::classify(false, 0.7), Severity::Medium);
        assert_eq!(Severity::classify(false, 0.69), Severity::Low);
        assert_eq!(Severity::classify(false, 0.0), Severity::Low);
    }

    #[test]
    fn known_classes_are_fully_annotated() {
        for class in DiseaseClass::ALL {
            let result = annotate(class.label(), 0.8, ModelSource::Trained);
            assert!(!result.recommendations.is_empty());
            assert_eq!(result.should_water, class.requires_watering());
            assert_eq!(result.disease_detected, !class.is_healthy());
            assert_eq!(result.prediction_fr, class.display_name_fr());
            assert_eq!(result.legacy.recommandations, result.recommendations);
        }
    }

    #[test]
    fn healthy_leaf_has_no_severity() {
        let result = annotate("Tomato_healthy", 0.95, ModelSource::Trained);
        assert_eq!(result.severity, Severity::None);
        assert!(!result.disease_detected);
        assert!(result.should_water);
    }

    #[test]
    fn unknown_label_gets_generic_advice() {
        let result = annotate("class_12", 0.5, ModelSource::Trained);
        assert_eq!(result.prediction_fr, "class_12");
        assert_eq!(result.recommendations, FALLBACK_RECOMMENDATIONS);
        assert!(!result.should_water);
        assert!(result.disease_detected);
        assert_eq!(result.severity, Severity::Low);
    }

    #[test]
    fn wire_format_carries_both_key_sets() {
        let result = annotate("Tomato_late_blight", 0.92, ModelSource::Placeholder);
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["prediction"], "Tomato_late_blight");
        assert_eq!(value["maladie"], "Tomato_late_blight");
        assert_eq!(value["predictionFr"], "Mildiou tardif");
        assert_eq!(value["severity"], "high");
        assert_eq!(value["diseaseDetected"], true);
        assert_eq!(value["shouldWater"], true);
        assert_eq!(value["arroser"], true);
        assert_eq!(value["modelUsed"], "demo_mode");
        assert!(value["timestamp"].is_string());
    }
}
