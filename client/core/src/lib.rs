//! Visitgate Client - Visitor Registration Engine
//!
//! Headless engine behind a company's public visitor check-in / check-out
//! form: schema loading, OTP gating of the identifying field, visitor status
//! resolution and submission.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           VISITGATE CLIENT                              │
//! │                                                                         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌─────────────┐ │
//! │  │    Schema    │  │   Status     │  │     OTP      │  │ Submission  │ │
//! │  │    Loader    │  │  Resolver    │  │ Coordinator  │  │  Pipeline   │ │
//! │  │  (fields +   │  │ (latest wins)│  │  (countdown) │  │ (multipart) │ │
//! │  │   company)   │  │              │  │              │  │             │ │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘  └──────┬──────┘ │
//! │         │                 │                 │                 │        │
//! │  ┌──────▼─────────────────▼─────────────────▼─────────────────▼──────┐ │
//! │  │                 Form Engine (Entry / Exit modes)                  │ │
//! │  └──────────────────────────────┬────────────────────────────────────┘ │
//! │                                 │                                       │
//! │  ┌──────────────┐  ┌────────────▼─┐  ┌──────────────┐                  │
//! │  │   Session    │  │  VisitorApi  │  │    Image     │                  │
//! │  │   Context    │  │   (reqwest)  │  │  Compressor  │                  │
//! │  └──────────────┘  └──────────────┘  └──────────────┘                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod compress;
pub mod config;
pub mod form;
pub mod notice;
pub mod otp;
pub mod schema;
pub mod session;
pub mod status;
pub mod submit;
pub mod values;

#[cfg(test)]
mod testing;

use thiserror::Error;

pub use api::{ApiError, HttpVisitorApi, VisitorApi};
pub use compress::{CompressError, ImageCompressor, ImageCrateCompressor};
pub use config::{ClientConfig, CompressionSettings, ConfigError};
pub use form::{FormEngine, FormMode, FormPhase, FormState, InputOutcome, VerifyOutcome};
pub use notice::{Notice, NoticeLevel, Notifier};
pub use otp::{OtpError, OtpPhase, OtpSession};
pub use schema::{CompanyInfo, FieldDefinition, FieldType, FormSchema, ValidationError};
pub use session::{Role, RoleSession, SessionClient, SessionContext, SessionError};
pub use status::VisitorStatus;
pub use submit::{SubmissionOutcome, SubmitError};
pub use values::{FieldValue, FormValues, VisitorFile};

/// Client error types
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Otp(#[from] OtpError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error(transparent)]
    Compress(#[from] CompressError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("form is not ready")]
    NotReady,
    #[error("unknown field \"{0}\"")]
    UnknownField(String),
    #[error("\"{0}\" is not shown in exit mode")]
    FieldHidden(String),
    #[error("\"{label}\" is a {field_type} field")]
    WrongFieldType {
        label: String,
        field_type: &'static str,
    },
    #[error("form has no OTP field")]
    NoOtpField,
    #[error("a submission is already in progress")]
    Busy,
    #[error("form was reloaded while the request was in flight")]
    Superseded,
}

pub type Result<T> = std::result::Result<T, ClientError>;
