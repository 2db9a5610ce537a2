//! Bulk mark entry: one input per eligible subject for a student/exam pair.

use crate::eligibility::SubjectRef;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

pub const MARK_MIN: f64 = 0.0;
pub const MARK_MAX: f64 = 100.0;
pub const MARK_STEP: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub subject_id: String,
    pub field: String,
    pub label: String,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub required: bool,
    pub initial: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct BulkForm {
    order: Vec<String>,
    fields: HashMap<String, FieldDescriptor>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanedMarks {
    /// (subject id, score) in form order.
    pub scores: Vec<(String, f64)>,
    pub blank: Vec<String>,
    /// Submitted keys that are not fields of this form.
    pub ignored: Vec<String>,
}

pub type FieldErrors = BTreeMap<String, String>;

impl BulkForm {
    /// `existing` maps subject id to the current score, shown as the initial
    /// value so re-entry edits instead of starting blank.
    pub fn build(subjects: &[SubjectRef], existing: &HashMap<String, f64>) -> Self {
        let mut form = BulkForm::default();
        for s in subjects {
            let descriptor = FieldDescriptor {
                subject_id: s.id.clone(),
                field: format!("subject_{}", s.id),
                label: s.name.clone(),
                min: MARK_MIN,
                max: MARK_MAX,
                step: MARK_STEP,
                required: false,
                initial: existing.get(&s.id).copied(),
            };
            form.order.push(s.id.clone());
            form.fields.insert(s.id.clone(), descriptor);
        }
        form
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn descriptors(&self) -> Vec<&FieldDescriptor> {
        self.order
            .iter()
            .filter_map(|id| self.fields.get(id))
            .collect()
    }

    /// Accepts values keyed either by subject id or by field name
    /// (`subject_<id>`). Numbers and numeric strings are accepted; `null`
    /// and empty strings are blank.
    pub fn clean(&self, submitted: &serde_json::Map<String, Value>) -> Result<CleanedMarks, FieldErrors> {
        let mut by_subject: HashMap<&str, &Value> = HashMap::new();
        let mut ignored = Vec::new();
        for (key, value) in submitted {
            let subject_id = key.strip_prefix("subject_").unwrap_or(key);
            if self.fields.contains_key(subject_id) {
                by_subject.insert(subject_id, value);
            } else if self.fields.contains_key(key.as_str()) {
                by_subject.insert(key.as_str(), value);
            } else {
                ignored.push(key.clone());
            }
        }

        let mut cleaned = CleanedMarks {
            ignored,
            ..CleanedMarks::default()
        };
        let mut errors = FieldErrors::new();
        for subject_id in &self.order {
            let Some(descriptor) = self.fields.get(subject_id) else {
                continue;
            };
            match by_subject.get(subject_id.as_str()) {
                None => cleaned.blank.push(subject_id.clone()),
                Some(value) => match clean_value(value, descriptor) {
                    Ok(None) => cleaned.blank.push(subject_id.clone()),
                    Ok(Some(v)) => cleaned.scores.push((subject_id.clone(), v)),
                    Err(msg) => {
                        errors.insert(descriptor.field.clone(), msg);
                    }
                },
            }
        }

        if errors.is_empty() {
            Ok(cleaned)
        } else {
            Err(errors)
        }
    }
}

fn clean_value(value: &Value, descriptor: &FieldDescriptor) -> Result<Option<f64>, String> {
    let v = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_f64().ok_or_else(|| "Enter a number.".to_string())?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<f64>().map_err(|_| "Enter a number.".to_string())?
        }
        _ => return Err("Enter a number.".to_string()),
    };
    if !v.is_finite() {
        return Err("Enter a number.".to_string());
    }
    if v < descriptor.min {
        return Err(format!(
            "Ensure this value is greater than or equal to {}.",
            descriptor.min
        ));
    }
    if v > descriptor.max {
        return Err(format!(
            "Ensure this value is less than or equal to {}.",
            descriptor.max
        ));
    }
    Ok(Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subjects() -> Vec<SubjectRef> {
        vec![
            SubjectRef {
                id: "math".to_string(),
                name: "Math".to_string(),
            },
            SubjectRef {
                id: "sci".to_string(),
                name: "Science".to_string(),
            },
        ]
    }

    fn submitted(v: serde_json::Value) -> serde_json::Map<String, Value> {
        v.as_object().cloned().expect("object")
    }

    #[test]
    fn build_uses_existing_scores_as_initial() {
        let mut existing = HashMap::new();
        existing.insert("sci".to_string(), 55.0);
        let form = BulkForm::build(&subjects(), &existing);
        let d = form.descriptors();
        assert_eq!(d.len(), 2);
        assert_eq!(d[0].field, "subject_math");
        assert_eq!(d[0].initial, None);
        assert_eq!(d[1].initial, Some(55.0));
        assert_eq!(d[1].max, 100.0);
    }

    #[test]
    fn clean_splits_blank_and_filled() {
        let form = BulkForm::build(&subjects(), &HashMap::new());
        let cleaned = form
            .clean(&submitted(json!({ "subject_math": "", "sci": 72.5, "art": 10 })))
            .expect("valid");
        assert_eq!(cleaned.scores, vec![("sci".to_string(), 72.5)]);
        assert_eq!(cleaned.blank, vec!["math".to_string()]);
        assert_eq!(cleaned.ignored, vec!["art".to_string()]);
    }

    #[test]
    fn clean_reports_field_errors() {
        let form = BulkForm::build(&subjects(), &HashMap::new());
        let errors = form
            .clean(&submitted(json!({ "math": "abc", "sci": 101 })))
            .expect_err("invalid");
        assert_eq!(errors.get("subject_math").map(String::as_str), Some("Enter a number."));
        assert_eq!(
            errors.get("subject_sci").map(String::as_str),
            Some("Ensure this value is less than or equal to 100.")
        );

        let errors = form
            .clean(&submitted(json!({ "math": -1 })))
            .expect_err("negative");
        assert!(errors.contains_key("subject_math"));
    }

    #[test]
    fn bounds_are_inclusive() {
        let form = BulkForm::build(&subjects(), &HashMap::new());
        let cleaned = form
            .clean(&submitted(json!({ "math": "0", "sci": "100" })))
            .expect("valid");
        assert_eq!(cleaned.scores.len(), 2);
    }
}
