//! Field schema
//!
//! Custom field definitions and company metadata for a company's public
//! visitor form, plus the loader that fetches both.

use crate::api::VisitorApi;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Per-keystroke upper bound for `number` fields without a configured max.
pub const DEFAULT_NUMBER_MAX_LEN: usize = 100;

/// Input kind of a custom field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Textarea,
    File,
    /// Types this client does not know; rendered as plain text input.
    #[serde(other)]
    Other,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::Textarea => "textarea",
            FieldType::File => "file",
            FieldType::Other => "other",
        }
    }
}

/// Length bounds configured for a field (string length, not numeric value).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValidation {
    #[serde(default)]
    pub min: Option<u32>,
    #[serde(default)]
    pub max: Option<u32>,
}

/// Inclusive character-count range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthBounds {
    pub min: usize,
    pub max: usize,
}

impl LengthBounds {
    pub fn contains(&self, len: usize) -> bool {
        len >= self.min && len <= self.max
    }
}

/// One custom field of a company's visitor form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    /// Display name, form key and multipart part name.
    pub label: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub validation: Option<FieldValidation>,
    #[serde(default)]
    pub otp_required: bool,
}

impl FieldDefinition {
    /// Bounds enforced on every keystroke. Only `number` fields are bounded;
    /// unset ends default to `0` and [`DEFAULT_NUMBER_MAX_LEN`].
    pub fn input_bounds(&self) -> Option<LengthBounds> {
        if self.field_type != FieldType::Number {
            return None;
        }
        let validation = self.validation.unwrap_or_default();
        Some(LengthBounds {
            min: validation.min.map_or(0, |v| v as usize),
            max: validation.max.map_or(DEFAULT_NUMBER_MAX_LEN, |v| v as usize),
        })
    }

    /// Bounds re-checked before submission: `number` fields that carry a
    /// validation object.
    pub fn configured_bounds(&self) -> Option<LengthBounds> {
        self.validation.and(self.input_bounds())
    }

    pub fn is_file(&self) -> bool {
        self.field_type == FieldType::File
    }
}

/// A field-scoped validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub label: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(label: &str, message: impl Into<String>) -> Self {
        Self {
            label: label.to_string(),
            message: message.into(),
        }
    }

    pub fn digits_only(label: &str) -> Self {
        Self::new(label, format!("\"{}\" must contain only digits.", label))
    }

    pub fn digit_count(label: &str, bounds: LengthBounds) -> Self {
        Self::new(
            label,
            format!("\"{}\" must be between {}-{} digits.", label, bounds.min, bounds.max),
        )
    }

    pub fn length(label: &str, bounds: LengthBounds) -> Self {
        Self::new(
            label,
            format!("\"{}\" must be between {}-{} characters.", label, bounds.min, bounds.max),
        )
    }

    pub fn otp_unverified(label: &str) -> Self {
        Self::new(label, format!("Please verify OTP for \"{}\".", label))
    }
}

/// Company display metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyInfo {
    #[serde(default)]
    pub name: String,
    /// Server-relative logo path.
    #[serde(default)]
    pub logo: Option<String>,
}

impl CompanyInfo {
    pub fn logo_url(&self, base_url: &str) -> Option<String> {
        self.logo.as_deref().filter(|l| !l.is_empty()).map(|logo| {
            format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                logo.trim_start_matches('/')
            )
        })
    }
}

/// Everything needed to render a company's form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormSchema {
    /// Sorted by ascending `position`.
    pub fields: Vec<FieldDefinition>,
    pub company: Option<CompanyInfo>,
}

impl FormSchema {
    pub fn new(mut fields: Vec<FieldDefinition>, company: Option<CompanyInfo>) -> Self {
        // Stable: equal positions keep server order.
        fields.sort_by_key(|f| f.position);
        Self { fields, company }
    }

    /// No fields and no company: the form does not exist.
    pub fn is_not_found(&self) -> bool {
        self.fields.is_empty() && self.company.is_none()
    }

    /// A known company that has not configured any fields yet.
    pub fn has_no_fields(&self) -> bool {
        self.fields.is_empty() && self.company.is_some()
    }

    pub fn field(&self, label: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.label == label)
    }

    /// The field gated by OTP, if the company configured one.
    pub fn otp_field(&self) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.otp_required)
    }
}

/// Fetches a company's form schema.
pub struct SchemaLoader {
    api: Arc<dyn VisitorApi>,
}

impl SchemaLoader {
    pub fn new(api: Arc<dyn VisitorApi>) -> Self {
        Self { api }
    }

    /// Fetch field definitions and company info concurrently. Failures are
    /// logged and collapse to an empty field list / no company.
    pub async fn load(&self, company_id: &str) -> FormSchema {
        let (fields, company) = tokio::join!(
            self.api.visitor_fields(company_id),
            self.api.company_info(company_id),
        );

        let fields = fields.unwrap_or_else(|e| {
            tracing::warn!(company_id, "Error fetching visitor fields: {}", e);
            Vec::new()
        });
        let company = company.unwrap_or_else(|e| {
            tracing::warn!(company_id, "Error fetching company info: {}", e);
            None
        });

        let schema = FormSchema::new(fields, company);
        tracing::info!(
            company_id,
            fields = schema.fields.len(),
            company = schema.company.is_some(),
            "Loaded form schema"
        );
        schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{field, FakeApi};

    #[test]
    fn test_field_json() {
        let json = r#"{"_id": "f1", "label": "Mobile No", "fieldType": "number",
                      "position": 3, "validation": {"min": 10, "max": 10}, "otpRequired": true}"#;
        let f: FieldDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(f.id, "f1");
        assert_eq!(f.field_type, FieldType::Number);
        assert_eq!(f.position, 3);
        assert_eq!(f.validation, Some(FieldValidation { min: Some(10), max: Some(10) }));
        assert!(f.otp_required);

        let unknown: FieldDefinition =
            serde_json::from_str(r#"{"_id": "f2", "label": "Email", "fieldType": "email"}"#).unwrap();
        assert_eq!(unknown.field_type, FieldType::Other);
        assert_eq!(unknown.position, 0);
        assert!(!unknown.otp_required);
    }

    #[test]
    fn test_bounds() {
        let mut mobile = field("Mobile No", FieldType::Number);
        assert_eq!(mobile.input_bounds(), Some(LengthBounds { min: 0, max: 100 }));
        assert_eq!(mobile.configured_bounds(), None);

        mobile.validation = Some(FieldValidation { min: Some(10), max: None });
        assert_eq!(mobile.input_bounds(), Some(LengthBounds { min: 10, max: 100 }));
        assert_eq!(mobile.configured_bounds(), Some(LengthBounds { min: 10, max: 100 }));

        let mut purpose = field("Purpose", FieldType::Text);
        purpose.validation = Some(FieldValidation { min: Some(1), max: Some(5) });
        assert_eq!(purpose.input_bounds(), None);
        assert_eq!(purpose.configured_bounds(), None);
    }

    #[test]
    fn test_schema_order_and_states() {
        let mut a = field("A", FieldType::Text);
        a.position = 2;
        let mut b = field("B", FieldType::Text);
        b.position = 1;
        let mut c = field("C", FieldType::Text);
        c.position = 2;
        let schema = FormSchema::new(vec![a, b, c], None);
        let labels: Vec<_> = schema.fields.iter().map(|f| f.label.as_str()).collect();
        assert_eq!(labels, ["B", "A", "C"]);

        assert!(FormSchema::default().is_not_found());
        let empty = FormSchema::new(vec![], Some(CompanyInfo { name: "Acme".into(), logo: None }));
        assert!(!empty.is_not_found());
        assert!(empty.has_no_fields());
    }

    #[test]
    fn test_logo_url() {
        let company = CompanyInfo {
            name: "Acme".into(),
            logo: Some("uploads/acme.png".into()),
        };
        assert_eq!(
            company.logo_url("http://localhost:5000/").as_deref(),
            Some("http://localhost:5000/uploads/acme.png")
        );
        assert_eq!(CompanyInfo { name: "x".into(), logo: None }.logo_url("http://a"), None);
    }

    #[tokio::test]
    async fn test_load_no_fields_is_not_not_found() {
        let api = FakeApi::new();
        api.set_company("c1", Some(CompanyInfo { name: "Acme".into(), logo: None }));
        let schema = SchemaLoader::new(api.clone()).load("c1").await;
        assert!(schema.has_no_fields());
        assert!(!schema.is_not_found());
    }

    #[tokio::test]
    async fn test_load_fails_soft() {
        let api = FakeApi::new();
        api.fail_schema("c1");
        let schema = SchemaLoader::new(api.clone()).load("c1").await;
        assert!(schema.is_not_found());
    }
}
