//! Submission pipeline
//!
//! Turns a filled-in form into either a new visitor entry (multipart upload)
//! or an exit record for the visitor identified by the OTP field.

use crate::api::{ApiError, VisitorApi};
use crate::compress::{CompressError, ImageCompressor};
use crate::form::FormMode;
use crate::schema::{FieldDefinition, ValidationError};
use crate::values::{FieldValue, FormValues, VisitorFile};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("could not compress \"{label}\": {source}")]
    Compression {
        label: String,
        #[source]
        source: CompressError,
    },
    #[error("form has no OTP field")]
    NoOtpField,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Body of one multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartBody {
    Text(String),
    File(VisitorFile),
}

/// A multipart part named after the field's label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadPart {
    pub name: String,
    pub body: PartBody,
}

/// Entry creation body, one part per field in schema order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitorPayload {
    pub parts: Vec<PayloadPart>,
}

impl VisitorPayload {
    pub fn text(&self, name: &str) -> Option<&str> {
        self.parts.iter().find(|p| p.name == name).and_then(|p| match &p.body {
            PartBody::Text(text) => Some(text.as_str()),
            PartBody::File(_) => None,
        })
    }

    pub fn file(&self, name: &str) -> Option<&VisitorFile> {
        self.parts.iter().find(|p| p.name == name).and_then(|p| match &p.body {
            PartBody::File(file) => Some(file),
            PartBody::Text(_) => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    EntryCreated { visitor_id: Option<String> },
    ExitRecorded,
}

pub struct SubmissionPipeline {
    api: Arc<dyn VisitorApi>,
    compressor: Arc<dyn ImageCompressor>,
}

impl SubmissionPipeline {
    pub fn new(api: Arc<dyn VisitorApi>, compressor: Arc<dyn ImageCompressor>) -> Self {
        Self { api, compressor }
    }

    /// Entry-mode checks, in field order: configured length bounds, then OTP
    /// verification. The first failure wins.
    pub fn preflight(
        fields: &[FieldDefinition],
        values: &FormValues,
        is_verified: impl Fn(&str) -> bool,
    ) -> Result<(), ValidationError> {
        for field in fields {
            if let Some(bounds) = field.configured_bounds() {
                let len = values.get(&field.label).map_or(0, FieldValue::char_len);
                if !bounds.contains(len) {
                    return Err(ValidationError::length(&field.label, bounds));
                }
            }
            if field.otp_required && !is_verified(&field.label) {
                return Err(ValidationError::otp_unverified(&field.label));
            }
        }
        Ok(())
    }

    /// One part per field; unset fields go out as empty text, files are
    /// compressed first.
    pub async fn build_payload(
        &self,
        fields: &[FieldDefinition],
        values: &FormValues,
    ) -> Result<VisitorPayload, SubmitError> {
        let mut parts = Vec::with_capacity(fields.len());
        for field in fields {
            let body = match values.get(&field.label) {
                Some(FieldValue::File(file)) => {
                    let compressed = self.compressor.compress(file).await.map_err(|source| {
                        SubmitError::Compression {
                            label: field.label.clone(),
                            source,
                        }
                    })?;
                    PartBody::File(compressed)
                }
                Some(FieldValue::Text(text)) => PartBody::Text(text.clone()),
                None => PartBody::Text(String::new()),
            };
            parts.push(PayloadPart {
                name: field.label.clone(),
                body,
            });
        }
        Ok(VisitorPayload { parts })
    }

    /// Validate and send. Nothing goes over the network when validation or
    /// compression fails.
    pub async fn submit(
        &self,
        company_id: &str,
        mode: FormMode,
        fields: &[FieldDefinition],
        values: &FormValues,
        is_verified: impl Fn(&str) -> bool,
    ) -> Result<SubmissionOutcome, SubmitError> {
        match mode {
            FormMode::Entry => {
                Self::preflight(fields, values, is_verified)?;
                let payload = self.build_payload(fields, values).await?;
                tracing::info!(company_id, parts = payload.parts.len(), "Submitting visitor entry");
                let visitor_id = self.api.create_visitor(company_id, payload).await?;
                tracing::info!(company_id, visitor_id = ?visitor_id, "Visitor entry created");
                Ok(SubmissionOutcome::EntryCreated { visitor_id })
            }
            FormMode::Exit => {
                let field = fields
                    .iter()
                    .find(|f| f.otp_required)
                    .ok_or(SubmitError::NoOtpField)?;
                if !is_verified(&field.label) {
                    return Err(ValidationError::otp_unverified(&field.label).into());
                }
                let value = values.text(&field.label).unwrap_or_default();
                tracing::info!(company_id, label = %field.label, "Recording visitor exit");
                self.api.record_exit(company_id, &field.label, value).await?;
                Ok(SubmissionOutcome::ExitRecorded)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::ImageCrateCompressor;
    use crate::schema::FieldType;
    use crate::testing::{field, mobile_field, visit_fields, FakeApi};
    use async_trait::async_trait;

    struct FailingCompressor;

    #[async_trait]
    impl ImageCompressor for FailingCompressor {
        async fn compress(&self, _file: &VisitorFile) -> Result<VisitorFile, CompressError> {
            Err(CompressError::Decode("corrupt".into()))
        }
    }

    fn pipeline(api: &Arc<FakeApi>) -> SubmissionPipeline {
        SubmissionPipeline::new(api.clone(), Arc::new(ImageCrateCompressor::default()))
    }

    fn filled() -> FormValues {
        let mut values = FormValues::new();
        values.set_text("Mobile No", "9876543210");
        values.set_text("Purpose", "Meeting");
        values
    }

    #[test]
    fn test_preflight_requires_verification() {
        let err = SubmissionPipeline::preflight(&visit_fields(), &filled(), |_| false).unwrap_err();
        assert_eq!(err.label, "Mobile No");
        assert_eq!(err.message, "Please verify OTP for \"Mobile No\".");
        assert!(SubmissionPipeline::preflight(&visit_fields(), &filled(), |_| true).is_ok());
    }

    #[test]
    fn test_preflight_rechecks_bounds() {
        let mut values = filled();
        values.set_text("Mobile No", "98765");
        let err = SubmissionPipeline::preflight(&visit_fields(), &values, |_| true).unwrap_err();
        assert_eq!(err.message, "\"Mobile No\" must be between 10-10 characters.");

        // Bounds without a validation object are not re-checked.
        let mut guests = field("Guests", FieldType::Number);
        guests.position = 3;
        let mut values = filled();
        values.set_text("Guests", "");
        assert!(SubmissionPipeline::preflight(&[guests], &values, |_| true).is_ok());
    }

    #[tokio::test]
    async fn test_entry_payload_in_field_order() {
        let api = FakeApi::new();
        let mut fields = visit_fields();
        let mut notes = field("Notes", FieldType::Textarea);
        notes.position = 3;
        fields.push(notes);

        let outcome = pipeline(&api)
            .submit("c1", FormMode::Entry, &fields, &filled(), |_| true)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SubmissionOutcome::EntryCreated { visitor_id: Some("visitor-1".into()) }
        );

        let created = api.created();
        assert_eq!(created.len(), 1);
        let (company, payload) = &created[0];
        assert_eq!(company, "c1");
        let names: Vec<_> = payload.parts.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Mobile No", "Purpose", "Notes"]);
        assert_eq!(payload.text("Purpose"), Some("Meeting"));
        assert_eq!(payload.text("Notes"), Some(""));
    }

    #[tokio::test]
    async fn test_unverified_entry_makes_no_call() {
        let api = FakeApi::new();
        let err = pipeline(&api)
            .submit("c1", FormMode::Entry, &visit_fields(), &filled(), |_| false)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Validation(_)));
        assert!(api.created().is_empty());
    }

    #[tokio::test]
    async fn test_compression_failure_names_field() {
        let api = FakeApi::new();
        let pipeline = SubmissionPipeline::new(api.clone(), Arc::new(FailingCompressor));
        let mut fields = visit_fields();
        fields.push(field("Photo", FieldType::File));
        let mut values = filled();
        values.set("Photo", FieldValue::File(VisitorFile::new("me.jpg", "image/jpeg", vec![1])));

        let err = pipeline
            .submit("c1", FormMode::Entry, &fields, &values, |_| true)
            .await
            .unwrap_err();
        match err {
            SubmitError::Compression { label, .. } => assert_eq!(label, "Photo"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(api.created().is_empty());
    }

    #[tokio::test]
    async fn test_exit_posts_otp_field() {
        let api = FakeApi::new();
        let outcome = pipeline(&api)
            .submit("c1", FormMode::Exit, &visit_fields(), &filled(), |_| true)
            .await
            .unwrap();
        assert_eq!(outcome, SubmissionOutcome::ExitRecorded);
        assert_eq!(
            api.exits(),
            vec![("c1".to_string(), "Mobile No".to_string(), "9876543210".to_string())]
        );
    }

    #[tokio::test]
    async fn test_exit_without_otp_field() {
        let api = FakeApi::new();
        let fields = vec![field("Purpose", FieldType::Text)];
        let err = pipeline(&api)
            .submit("c1", FormMode::Exit, &fields, &FormValues::new(), |_| true)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::NoOtpField));

        let err = pipeline(&api)
            .submit("c1", FormMode::Exit, &[mobile_field(10, 10)], &filled(), |_| false)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Validation(_)));
        assert!(api.exits().is_empty());
    }
}
