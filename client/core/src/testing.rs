//! Scripted in-memory [`VisitorApi`] for engine tests.

use crate::api::{ApiError, VisitorApi};
use crate::schema::{CompanyInfo, FieldDefinition, FieldType, FieldValidation};
use crate::status::VisitorStatus;
use crate::submit::VisitorPayload;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Notify;

pub const GOOD_OTP: &str = "4321";

pub fn field(label: &str, field_type: FieldType) -> FieldDefinition {
    FieldDefinition {
        id: format!("id-{}", label),
        label: label.to_string(),
        field_type,
        position: 0,
        validation: None,
        otp_required: false,
    }
}

pub fn mobile_field(min: u32, max: u32) -> FieldDefinition {
    FieldDefinition {
        position: 1,
        validation: Some(FieldValidation {
            min: Some(min),
            max: Some(max),
        }),
        otp_required: true,
        ..field("Mobile No", FieldType::Number)
    }
}

/// `Mobile No` (OTP, exactly 10 digits) followed by `Purpose`.
pub fn visit_fields() -> Vec<FieldDefinition> {
    let mut purpose = field("Purpose", FieldType::Text);
    purpose.position = 2;
    vec![mobile_field(10, 10), purpose]
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Failure {
    Rejected,
    /// Non-2xx answer.
    Http,
    Network,
}

impl Failure {
    fn error(self) -> ApiError {
        match self {
            Failure::Rejected => ApiError::Rejected {
                status: 400,
                message: "rejected".into(),
            },
            Failure::Http => ApiError::Http {
                status: 400,
                message: Some("bad request".into()),
            },
            Failure::Network => ApiError::Network("connection reset".into()),
        }
    }
}

#[derive(Default)]
struct Script {
    fields: HashMap<String, Vec<FieldDefinition>>,
    companies: HashMap<String, CompanyInfo>,
    schema_failures: HashSet<String>,
    statuses: HashMap<String, VisitorStatus>,
    status_failure: bool,
    status_holds: HashMap<String, Arc<Notify>>,
    send_failure: Option<Failure>,
    create_failure: Option<Failure>,
    exit_failure: Option<Failure>,
}

#[derive(Default)]
struct Calls {
    status: Vec<String>,
    sent: Vec<String>,
    verified: Vec<(String, String)>,
    created: Vec<(String, VisitorPayload)>,
    exits: Vec<(String, String, String)>,
}

#[derive(Default)]
pub struct FakeApi {
    script: Mutex<Script>,
    calls: Mutex<Calls>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_form(company_id: &str, fields: Vec<FieldDefinition>) -> Arc<Self> {
        let api = Self::new();
        api.set_fields(company_id, fields);
        api.set_company(
            company_id,
            Some(CompanyInfo {
                name: "Acme".into(),
                logo: Some("uploads/acme.png".into()),
            }),
        );
        api
    }

    pub fn set_fields(&self, company_id: &str, fields: Vec<FieldDefinition>) {
        self.script.lock().fields.insert(company_id.into(), fields);
    }

    pub fn set_company(&self, company_id: &str, company: Option<CompanyInfo>) {
        let mut script = self.script.lock();
        match company {
            Some(c) => script.companies.insert(company_id.into(), c),
            None => script.companies.remove(company_id),
        };
    }

    pub fn fail_schema(&self, company_id: &str) {
        self.script.lock().schema_failures.insert(company_id.into());
    }

    pub fn set_status(&self, number: &str, status: VisitorStatus) {
        self.script.lock().statuses.insert(number.into(), status);
    }

    pub fn fail_status(&self) {
        self.script.lock().status_failure = true;
    }

    /// Park status checks for `number` until the returned gate is notified.
    pub fn hold_status(&self, number: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.script
            .lock()
            .status_holds
            .insert(number.into(), Arc::clone(&gate));
        gate
    }

    pub fn fail_send(&self, failure: Option<Failure>) {
        self.script.lock().send_failure = failure;
    }

    pub fn fail_create(&self, failure: Option<Failure>) {
        self.script.lock().create_failure = failure;
    }

    pub fn fail_exit(&self, failure: Option<Failure>) {
        self.script.lock().exit_failure = failure;
    }

    pub fn status_calls(&self) -> Vec<String> {
        self.calls.lock().status.clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.calls.lock().sent.clone()
    }

    pub fn verified(&self) -> Vec<(String, String)> {
        self.calls.lock().verified.clone()
    }

    pub fn created(&self) -> Vec<(String, VisitorPayload)> {
        self.calls.lock().created.clone()
    }

    pub fn exits(&self) -> Vec<(String, String, String)> {
        self.calls.lock().exits.clone()
    }

    pub async fn wait_for_status_calls(&self, count: usize) {
        while self.calls.lock().status.len() < count {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl VisitorApi for FakeApi {
    async fn visitor_fields(&self, company_id: &str) -> Result<Vec<FieldDefinition>, ApiError> {
        let script = self.script.lock();
        if script.schema_failures.contains(company_id) {
            return Err(Failure::Network.error());
        }
        Ok(script.fields.get(company_id).cloned().unwrap_or_default())
    }

    async fn company_info(&self, company_id: &str) -> Result<Option<CompanyInfo>, ApiError> {
        let script = self.script.lock();
        if script.schema_failures.contains(company_id) {
            return Err(Failure::Network.error());
        }
        Ok(script.companies.get(company_id).cloned())
    }

    async fn visitor_status(
        &self,
        _company_id: &str,
        _label: &str,
        number: &str,
    ) -> Result<Option<VisitorStatus>, ApiError> {
        self.calls.lock().status.push(number.to_string());
        let hold = self.script.lock().status_holds.get(number).cloned();
        if let Some(gate) = hold {
            gate.notified().await;
        }
        let script = self.script.lock();
        if script.status_failure {
            return Err(Failure::Network.error());
        }
        Ok(script.statuses.get(number).cloned())
    }

    async fn send_otp(&self, _company_id: &str, mobile: &str) -> Result<(), ApiError> {
        if let Some(failure) = self.script.lock().send_failure {
            return Err(failure.error());
        }
        self.calls.lock().sent.push(mobile.to_string());
        Ok(())
    }

    async fn verify_otp(&self, _company_id: &str, mobile: &str, otp: &str) -> Result<(), ApiError> {
        self.calls
            .lock()
            .verified
            .push((mobile.to_string(), otp.to_string()));
        if otp == GOOD_OTP {
            Ok(())
        } else {
            Err(Failure::Rejected.error())
        }
    }

    async fn create_visitor(
        &self,
        company_id: &str,
        payload: VisitorPayload,
    ) -> Result<Option<String>, ApiError> {
        if let Some(failure) = self.script.lock().create_failure {
            return Err(failure.error());
        }
        let mut calls = self.calls.lock();
        calls.created.push((company_id.to_string(), payload));
        Ok(Some(format!("visitor-{}", calls.created.len())))
    }

    async fn record_exit(&self, company_id: &str, label: &str, mobile: &str) -> Result<(), ApiError> {
        if let Some(failure) = self.script.lock().exit_failure {
            return Err(failure.error());
        }
        self.calls
            .lock()
            .exits
            .push((company_id.to_string(), label.to_string(), mobile.to_string()));
        Ok(())
    }
}
