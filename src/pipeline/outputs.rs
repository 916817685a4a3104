//! Typed shapes for the generated artifacts.
//!
//! Fields a model commonly omits carry `#[serde(default)]`; `validate`
//! rejects outputs that parse but are structurally useless.

use serde::{Deserialize, Serialize};

use crate::repair::OutputShape;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactedModule {
    pub name: String,
    #[serde(default)]
    pub change: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub similar_projects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactedModules {
    pub modules: Vec<ImpactedModule>,
}

impl OutputShape for ImpactedModules {
    fn validate(&self) -> Result<(), String> {
        if self.modules.is_empty() {
            return Err("no impacted modules listed".into());
        }
        if self.modules.iter().any(|m| m.name.trim().is_empty()) {
            return Err("impacted module with empty name".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateItem {
    pub module: String,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub role: String,
    pub days: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffortEstimate {
    pub items: Vec<EstimateItem>,
    #[serde(default)]
    pub total_days: f64,
    #[serde(default)]
    pub assumptions: Vec<String>,
}

impl OutputShape for EffortEstimate {
    fn validate(&self) -> Result<(), String> {
        if self.items.is_empty() {
            return Err("estimate has no items".into());
        }
        if let Some(bad) = self.items.iter().find(|i| !i.days.is_finite() || i.days < 0.0) {
            return Err(format!("invalid day count {} for module {}", bad.days, bad.module));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftSection {
    pub heading: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftRisk {
    pub title: String,
    #[serde(default)]
    pub mitigation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignDraft {
    #[serde(default)]
    pub title: String,
    pub sections: Vec<DraftSection>,
    #[serde(default)]
    pub risks: Vec<DraftRisk>,
}

impl OutputShape for DesignDraft {
    fn validate(&self) -> Result<(), String> {
        if self.sections.is_empty() {
            return Err("design draft has no sections".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacklogStory {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub points: f64,
    #[serde(default)]
    pub module: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacklogDraft {
    pub items: Vec<BacklogStory>,
}

impl OutputShape for BacklogDraft {
    fn validate(&self) -> Result<(), String> {
        if self.items.is_empty() {
            return Err("backlog has no items".into());
        }
        if self.items.iter().any(|i| i.title.trim().is_empty()) {
            return Err("backlog item with empty title".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repair::parse_output;

    #[test]
    fn estimate_rejects_negative_days() {
        let err = parse_output::<EffortEstimate>(r#"{"items": [{"module": "auth", "days": -1}]}"#);
        assert!(err.is_err());
    }

    #[test]
    fn optional_fields_default() {
        let parsed = parse_output::<ImpactedModules>(r#"{"modules": [{"name": "auth"}]}"#).unwrap();
        assert_eq!(parsed.value.modules[0].change, "");
        assert!(!parsed.repaired);
    }

    #[test]
    fn empty_backlog_rejected() {
        assert!(parse_output::<BacklogDraft>(r#"{"items": []}"#).is_err());
    }
}
