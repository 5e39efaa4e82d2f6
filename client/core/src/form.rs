//! Form state machine
//!
//! ```text
//!   Loading ──schema──▶ NotFound            (no fields, no company)
//!      │
//!      └──────────────▶ Ready ─┬─ Entry ◀──┐  driven by the latest
//!                              └─ Exit  ◀──┘  VisitorStatus.isActive
//! ```
//!
//! [`FormEngine`] owns one company's form at a time. Loading another company
//! bumps an epoch; any response that comes back for an older epoch is dropped
//! before it can touch state.

use crate::api::{ApiError, HttpVisitorApi, VisitorApi};
use crate::compress::{ImageCompressor, ImageCrateCompressor};
use crate::config::ClientConfig;
use crate::notice::{Notice, Notifier};
use crate::otp::{OtpCoordinator, OtpError, OtpSession};
use crate::schema::{FieldDefinition, FormSchema, LengthBounds, SchemaLoader};
use crate::status::{StatusResolver, VisitorStatus};
use crate::submit::{SubmissionOutcome, SubmissionPipeline, SubmitError};
use crate::values::{FieldValue, FormValues, VisitorFile};
use crate::{ClientError, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FormPhase {
    #[default]
    Loading,
    NotFound,
    Ready,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FormMode {
    #[default]
    Entry,
    Exit,
}

/// Everything a renderer needs to draw the form.
#[derive(Debug, Clone, Default)]
pub struct FormState {
    pub company_id: Option<String>,
    pub phase: FormPhase,
    pub schema: FormSchema,
    pub mode: FormMode,
    /// Latest accepted status answer.
    pub status: Option<VisitorStatus>,
    pub values: FormValues,
    /// Field-scoped error text keyed by label.
    pub errors: BTreeMap<String, String>,
    /// `data:` URLs for attached files keyed by label.
    pub previews: BTreeMap<String, String>,
    /// Outcome banner of the last submission.
    pub message: Option<Notice>,
    pub submitting: bool,
}

impl FormState {
    fn loading(company_id: &str) -> Self {
        Self {
            company_id: Some(company_id.to_string()),
            ..Self::default()
        }
    }

    /// Fields shown in the current mode: all of them on entry, only the OTP
    /// field on exit.
    pub fn visible_fields(&self) -> Vec<&FieldDefinition> {
        match self.mode {
            FormMode::Entry => self.schema.fields.iter().collect(),
            FormMode::Exit => self.schema.otp_field().into_iter().collect(),
        }
    }

    fn ready_company(&self) -> Result<String> {
        match (&self.company_id, self.phase) {
            (Some(company_id), FormPhase::Ready) => Ok(company_id.clone()),
            _ => Err(ClientError::NotReady),
        }
    }

    fn clear_input(&mut self) {
        self.values.clear();
        self.errors.clear();
        self.previews.clear();
    }
}

/// Result of a keystroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    Accepted,
    /// Length outside these bounds; the stored value is unchanged.
    Rejected(LengthBounds),
    /// The OTP cycle holds the field read-only.
    Locked,
}

/// Verification followed by the status refresh it triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub mode: FormMode,
    /// Labels filled in from the visitor's previous entry.
    pub prefilled: Vec<String>,
}

enum StatusSource<'a> {
    /// The identifying field changed to this label's current value.
    Input(&'a str),
    Verification,
}

/// Visitor registration engine for one form at a time.
pub struct FormEngine {
    loader: SchemaLoader,
    resolver: StatusResolver,
    otp: OtpCoordinator,
    pipeline: SubmissionPipeline,
    notifier: Notifier,
    state: RwLock<FormState>,
    epoch: AtomicU64,
}

impl FormEngine {
    pub fn new(
        api: Arc<dyn VisitorApi>,
        compressor: Arc<dyn ImageCompressor>,
        config: &ClientConfig,
    ) -> Self {
        let notifier = Notifier::new();
        Self {
            loader: SchemaLoader::new(Arc::clone(&api)),
            resolver: StatusResolver::new(Arc::clone(&api)),
            otp: OtpCoordinator::new(Arc::clone(&api), notifier.clone(), config.otp_resend_secs),
            pipeline: SubmissionPipeline::new(api, compressor),
            notifier,
            state: RwLock::new(FormState::default()),
            epoch: AtomicU64::new(0),
        }
    }

    /// Engine talking HTTP to `config.api_url`.
    pub fn from_config(config: &ClientConfig) -> std::result::Result<Self, ApiError> {
        let api = Arc::new(HttpVisitorApi::from_config(config)?);
        let compressor = Arc::new(ImageCrateCompressor::new(config.compression.clone()));
        Ok(Self::new(api, compressor, config))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notifier.subscribe()
    }

    pub fn snapshot(&self) -> FormState {
        self.state.read().clone()
    }

    /// The OTP field's label and session, if the form has one.
    pub fn otp_session(&self) -> Option<(String, OtpSession)> {
        let label = self.state.read().schema.otp_field()?.label.clone();
        let session = self.otp.session(&label);
        Some((label, session))
    }

    /// Load `company_id`'s form, abandoning whatever was loaded before.
    pub async fn load(&self, company_id: &str) -> Result<FormPhase> {
        let epoch = {
            let mut state = self.state.write();
            let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            self.otp.reset_all();
            self.resolver.invalidate();
            *state = FormState::loading(company_id);
            epoch
        };
        tracing::info!(company_id, "Loading visitor form");

        let schema = self.loader.load(company_id).await;

        self.with_current(epoch, |state| {
            state.phase = if schema.is_not_found() {
                tracing::warn!(company_id, "Visitor form not found");
                FormPhase::NotFound
            } else {
                FormPhase::Ready
            };
            state.schema = schema;
            state.phase
        })
    }

    /// Tear down: stop countdowns and drop in-flight responses.
    pub fn close(&self) {
        let mut state = self.state.write();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.otp.reset_all();
        self.resolver.invalidate();
        *state = FormState::default();
    }

    /// Apply a keystroke to a text-like field.
    ///
    /// `number` fields only take values whose length is within their bounds;
    /// the empty string is always taken. A change to the OTP field resets its
    /// OTP session and checks the visitor's status.
    pub async fn set_value(&self, label: &str, value: &str) -> Result<InputOutcome> {
        let (epoch, company_id, field) = {
            let state = self.state.read();
            let company_id = state.ready_company()?;
            let field = state
                .schema
                .field(label)
                .cloned()
                .ok_or_else(|| ClientError::UnknownField(label.into()))?;
            if field.is_file() {
                return Err(ClientError::WrongFieldType {
                    label: label.into(),
                    field_type: field.field_type.as_str(),
                });
            }
            if state.mode == FormMode::Exit && !field.otp_required {
                return Err(ClientError::FieldHidden(label.into()));
            }
            (self.epoch.load(Ordering::SeqCst), company_id, field)
        };

        if field.otp_required && self.otp.session(label).locks_field() {
            return Ok(InputOutcome::Locked);
        }

        let len = value.chars().count();
        let bounds = field.input_bounds();
        if let Some(bounds) = bounds.filter(|b| !value.is_empty() && !b.contains(len)) {
            tracing::debug!(label, len, "Keystroke outside bounds");
            return Ok(InputOutcome::Rejected(bounds));
        }

        self.with_current(epoch, |state| {
            state.values.set_text(label, value);
            if bounds.map_or(true, |b| b.contains(len)) {
                state.errors.remove(label);
            }
        })?;

        if field.otp_required {
            self.otp.value_changed(label, value);
            if value.is_empty() {
                self.resolver.invalidate();
            } else {
                match self.resolver.check(&company_id, label, value).await {
                    Some(status) => self.with_current(epoch, |state| {
                        self.apply_status(state, status, StatusSource::Input(label));
                    })?,
                    // A newer keystroke owns the status; only a reload is an error.
                    None => self.ensure_current(epoch)?,
                }
            }
        }
        Ok(InputOutcome::Accepted)
    }

    /// Attach a picked file to a `file` field and build its preview.
    pub fn attach_file(&self, label: &str, file: VisitorFile) -> Result<()> {
        let mut state = self.state.write();
        state.ready_company()?;
        let field = state
            .schema
            .field(label)
            .ok_or_else(|| ClientError::UnknownField(label.into()))?;
        if !field.is_file() {
            return Err(ClientError::WrongFieldType {
                label: label.into(),
                field_type: field.field_type.as_str(),
            });
        }
        if state.mode == FormMode::Exit {
            return Err(ClientError::FieldHidden(label.into()));
        }
        tracing::debug!(label, bytes = file.len(), mime = %file.mime, "Attached file");
        state.previews.insert(label.to_string(), file.preview_url());
        state.values.set(label, FieldValue::File(file));
        state.errors.remove(label);
        Ok(())
    }

    /// Remove the file attached to a `file` field.
    pub fn clear_file(&self, label: &str) -> Result<()> {
        let mut state = self.state.write();
        state.ready_company()?;
        let field = state
            .schema
            .field(label)
            .ok_or_else(|| ClientError::UnknownField(label.into()))?;
        if !field.is_file() {
            return Err(ClientError::WrongFieldType {
                label: label.into(),
                field_type: field.field_type.as_str(),
            });
        }
        if state.mode == FormMode::Exit {
            return Err(ClientError::FieldHidden(label.into()));
        }
        state.values.remove(label);
        state.previews.remove(label);
        Ok(())
    }

    /// Send the first OTP for the OTP field's current value.
    pub async fn send_otp(&self) -> Result<()> {
        let (epoch, company_id, field, value) = {
            let state = self.state.read();
            let company_id = state.ready_company()?;
            let field = state.schema.otp_field().cloned().ok_or(ClientError::NoOtpField)?;
            let value = state.values.text(&field.label).unwrap_or_default().to_string();
            (self.epoch.load(Ordering::SeqCst), company_id, field, value)
        };

        match self.otp.send(&company_id, &field, &value).await {
            Ok(()) => self.with_current(epoch, |state| {
                state.errors.remove(&field.label);
            }),
            Err(OtpError::Validation(e)) => {
                self.with_current(epoch, |state| {
                    state.errors.insert(e.label.clone(), e.message.clone());
                })?;
                Err(OtpError::Validation(e).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn resend_otp(&self) -> Result<()> {
        let (epoch, company_id, label) = self.otp_context()?;
        self.otp.resend(&company_id, &label).await?;
        self.ensure_current(epoch)
    }

    /// Verify `code`, then refresh the visitor's status. An inactive visitor
    /// gets empty fields prefilled from their last entry; an active one moves
    /// the form to exit mode.
    pub async fn verify_otp(&self, code: &str) -> Result<VerifyOutcome> {
        let (epoch, company_id, label) = self.otp_context()?;
        self.otp.verify(&company_id, &label, code).await?;

        let value = {
            let state = self.state.read();
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return Err(ClientError::Superseded);
            }
            state.values.text(&label).unwrap_or_default().to_string()
        };
        let status = self.resolver.check(&company_id, &label, &value).await;

        self.with_current(epoch, |state| {
            let prefilled = match status {
                Some(status) => self.apply_status(state, status, StatusSource::Verification),
                None => Vec::new(),
            };
            if !prefilled.is_empty() {
                tracing::info!(fields = prefilled.len(), "Prefilled from previous visit");
            }
            VerifyOutcome {
                mode: state.mode,
                prefilled,
            }
        })
    }

    /// Abandon the OTP cycle so the number can be edited again.
    pub fn reset_otp(&self) -> Result<()> {
        let label = {
            let state = self.state.read();
            state.schema.otp_field().ok_or(ClientError::NoOtpField)?.label.clone()
        };
        self.otp.reset(&label);
        Ok(())
    }

    /// Submit the form in its current mode.
    pub async fn submit(&self) -> Result<SubmissionOutcome> {
        let (epoch, company_id, mode, fields, values) = {
            let mut state = self.state.write();
            let company_id = state.ready_company()?;
            if state.submitting {
                return Err(ClientError::Busy);
            }
            state.submitting = true;
            state.message = None;
            (
                self.epoch.load(Ordering::SeqCst),
                company_id,
                state.mode,
                state.schema.fields.clone(),
                state.values.clone(),
            )
        };

        let result = self
            .pipeline
            .submit(&company_id, mode, &fields, &values, |label: &str| {
                self.otp.is_verified(label)
            })
            .await;

        self.with_current(epoch, |state| {
            state.submitting = false;
            match &result {
                Ok(outcome) => {
                    state.clear_input();
                    self.otp.reset_all();
                    self.resolver.invalidate();
                    let text = match outcome {
                        SubmissionOutcome::EntryCreated { .. } => "Visitor entry submitted successfully!",
                        SubmissionOutcome::ExitRecorded => {
                            state.mode = FormMode::Entry;
                            state.status = Some(VisitorStatus::inactive());
                            "Visitor exit recorded successfully!"
                        }
                    };
                    state.message = Some(Notice::success(text));
                }
                Err(SubmitError::Validation(e)) => {
                    state.errors.insert(e.label.clone(), e.message.clone());
                }
                Err(SubmitError::Compression { label, source }) => {
                    tracing::warn!(label = %label, "Compression failed: {}", source);
                    state.values.remove(label);
                    state.previews.remove(label);
                    state.message = Some(Notice::error("Error compressing image."));
                }
                Err(SubmitError::NoOtpField) => {
                    state.message = Some(Notice::error("No OTP field configured."));
                }
                Err(SubmitError::Api(e)) => {
                    tracing::warn!(company_id = %company_id, mode = ?mode, "Submission failed: {}", e);
                    let text = match (e.is_rejection(), mode) {
                        (true, _) => "Something went wrong.",
                        (false, FormMode::Entry) => "Error submitting form.",
                        (false, FormMode::Exit) => "Error recording exit.",
                    };
                    state.message = Some(Notice::error(text));
                }
            }
        })?;

        result.map_err(Into::into)
    }

    fn otp_context(&self) -> Result<(u64, String, String)> {
        let state = self.state.read();
        let company_id = state.ready_company()?;
        let label = state.schema.otp_field().ok_or(ClientError::NoOtpField)?.label.clone();
        Ok((self.epoch.load(Ordering::SeqCst), company_id, label))
    }

    fn ensure_current(&self, epoch: u64) -> Result<()> {
        self.with_current(epoch, |_| ())
    }

    /// Run `update` against the state if no reload happened since `epoch`.
    fn with_current<R>(&self, epoch: u64, update: impl FnOnce(&mut FormState) -> R) -> Result<R> {
        let mut state = self.state.write();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            tracing::debug!(epoch, "Dropping response for a form that is no longer loaded");
            return Err(ClientError::Superseded);
        }
        Ok(update(&mut state))
    }

    /// Fold a status answer into the form. Returns the prefilled labels.
    fn apply_status(
        &self,
        state: &mut FormState,
        status: VisitorStatus,
        source: StatusSource<'_>,
    ) -> Vec<String> {
        let mode = if status.is_active {
            FormMode::Exit
        } else {
            FormMode::Entry
        };

        let mut prefilled = Vec::new();
        if mode != state.mode {
            tracing::info!(from = ?state.mode, to = ?mode, "Switching form mode");
            // The number that identified the visitor survives a switch it caused.
            let kept = match source {
                StatusSource::Input(label) => state.values.get(label).cloned().map(|v| (label, v)),
                StatusSource::Verification => None,
            };
            state.clear_input();
            state.message = None;
            self.otp.reset_all();
            if let Some((label, value)) = kept {
                state.values.set(label, value);
            }
            state.mode = mode;
        } else if matches!(source, StatusSource::Verification) && !status.is_active {
            for (label, text) in status.text_fields() {
                let fillable = state.schema.field(&label).is_some_and(|f| !f.is_file());
                if fillable && !state.values.is_populated(&label) {
                    state.values.set_text(&label, text);
                    prefilled.push(label);
                }
            }
        }

        state.status = Some(status);
        prefilled
    }
}
