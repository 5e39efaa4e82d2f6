//! OTP Coordinator
//!
//! Send / verify / resend lifecycle for OTP-gated fields, one session per
//! field label.
//!
//! ```text
//!   Idle ──send──▶ Sending ──ok──▶ Sent ──verify──▶ Verifying ──ok──▶ Verified
//!    ▲                │ err          ▲ │                 │ err
//!    └────────────────┘              │ └─resend (countdown at 0)─▶ Sending
//!                                    └──────────────────────────────────┘
//! ```
//!
//! Any change to the field's value drops the session back to `Idle`. The
//! resend countdown is a spawned task owned by the coordinator; it is aborted
//! when its label is reset, when a new countdown replaces it, and when the
//! coordinator is dropped.

use crate::api::{ApiError, VisitorApi};
use crate::notice::{Notice, Notifier};
use crate::schema::{FieldDefinition, LengthBounds, ValidationError, DEFAULT_NUMBER_MAX_LEN};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

#[derive(Debug, Error)]
pub enum OtpError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("no OTP has been sent for \"{0}\"")]
    NotSent(String),
    #[error("an OTP was already sent for \"{0}\"")]
    AlreadySent(String),
    #[error("\"{0}\" is already verified")]
    AlreadyVerified(String),
    #[error("resend available in {0}s")]
    ResendLocked(u32),
    #[error("an OTP request for \"{0}\" is already in flight")]
    Busy(String),
    #[error("OTP request for \"{0}\" was superseded")]
    Superseded(String),
    #[error("OTP request failed: {0}")]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpPhase {
    Idle,
    Sending,
    Sent,
    Verifying,
    Verified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Send,
    Resend,
    Verify,
}

/// OTP state for one label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OtpSession {
    pub sent: bool,
    pub verified: bool,
    pub loading: bool,
    /// Seconds until resend unlocks; `None` before any send.
    pub countdown_seconds: Option<u32>,
    /// Value the OTP was requested for.
    value: Option<String>,
    pending: Option<Pending>,
    /// Identifies the request that owns `pending`.
    ticket: u64,
}

impl OtpSession {
    pub fn phase(&self) -> OtpPhase {
        match (self.verified, self.pending, self.sent) {
            (true, _, _) => OtpPhase::Verified,
            (false, Some(Pending::Send | Pending::Resend), _) => OtpPhase::Sending,
            (false, Some(Pending::Verify), _) => OtpPhase::Verifying,
            (false, None, true) => OtpPhase::Sent,
            (false, None, false) => OtpPhase::Idle,
        }
    }

    pub fn is_idle(&self) -> bool {
        *self == OtpSession::default()
    }

    /// Resend is open once a code went out, nothing is in flight and the
    /// countdown has run out.
    pub fn can_resend(&self) -> bool {
        self.sent
            && !self.verified
            && self.pending.is_none()
            && self.countdown_seconds.map_or(true, |s| s == 0)
    }

    /// The field is read-only while a countdown runs and once verified.
    pub fn locks_field(&self) -> bool {
        self.verified || (self.sent && self.countdown_seconds.is_some_and(|s| s > 0))
    }
}

/// Digits-only check plus the field's length bounds, applied before a send.
pub fn validate_for_send(field: &FieldDefinition, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::digits_only(&field.label));
    }
    let bounds = field.input_bounds().unwrap_or(LengthBounds {
        min: 0,
        max: DEFAULT_NUMBER_MAX_LEN,
    });
    if !bounds.contains(value.chars().count()) {
        return Err(ValidationError::digit_count(&field.label, bounds));
    }
    Ok(())
}

/// Repeating one-second countdown for a label. Aborted on drop.
struct CountdownTimer {
    handle: JoinHandle<()>,
}

impl CountdownTimer {
    fn start(label: String, sessions: Arc<RwLock<HashMap<String, OtpSession>>>) -> Self {
        let handle = tokio::spawn(async move {
            let period = Duration::from_secs(1);
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let finished = {
                    let mut sessions = sessions.write();
                    match sessions.get_mut(&label).and_then(|s| s.countdown_seconds.as_mut()) {
                        Some(remaining) if *remaining > 1 => {
                            *remaining -= 1;
                            false
                        }
                        Some(remaining) => {
                            *remaining = 0;
                            true
                        }
                        None => true,
                    }
                };
                if finished {
                    tracing::debug!(label = %label, "Resend countdown finished");
                    break;
                }
            }
        });
        Self { handle }
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Drives OTP sessions against the API.
pub struct OtpCoordinator {
    api: Arc<dyn VisitorApi>,
    notifier: Notifier,
    resend_after: u32,
    sessions: Arc<RwLock<HashMap<String, OtpSession>>>,
    timers: Mutex<HashMap<String, CountdownTimer>>,
    tickets: AtomicU64,
}

impl OtpCoordinator {
    pub fn new(api: Arc<dyn VisitorApi>, notifier: Notifier, resend_after: u32) -> Self {
        Self {
            api,
            notifier,
            resend_after,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            timers: Mutex::new(HashMap::new()),
            tickets: AtomicU64::new(0),
        }
    }

    /// Current session for `label`, idle if none exists.
    pub fn session(&self, label: &str) -> OtpSession {
        self.sessions.read().get(label).cloned().unwrap_or_default()
    }

    pub fn is_verified(&self, label: &str) -> bool {
        self.sessions.read().get(label).is_some_and(|s| s.verified)
    }

    /// Validate `value` and dispatch the first OTP for it.
    pub async fn send(
        &self,
        company_id: &str,
        field: &FieldDefinition,
        value: &str,
    ) -> Result<(), OtpError> {
        let label = field.label.as_str();
        validate_for_send(field, value)?;

        let ticket = {
            let mut sessions = self.sessions.write();
            let session = sessions.entry(label.to_string()).or_default();
            if session.pending.is_some() {
                return Err(OtpError::Busy(label.into()));
            }
            if session.verified {
                return Err(OtpError::AlreadyVerified(label.into()));
            }
            if session.sent {
                return Err(OtpError::AlreadySent(label.into()));
            }
            let ticket = self.next_ticket();
            session.pending = Some(Pending::Send);
            session.loading = true;
            session.value = Some(value.to_string());
            session.ticket = ticket;
            ticket
        };

        tracing::info!(label, digits = value.len(), "Sending OTP");
        let result = self.api.send_otp(company_id, value).await;

        let applied = self.finish(label, ticket, |session| {
            session.pending = None;
            match &result {
                Ok(()) => {
                    session.sent = true;
                    session.countdown_seconds = Some(self.resend_after);
                }
                Err(_) => session.value = None,
            }
        });
        if !applied {
            return Err(OtpError::Superseded(label.into()));
        }

        match result {
            Ok(()) => {
                self.start_countdown(label);
                self.notifier.publish(Notice::success("OTP sent successfully!"));
                Ok(())
            }
            Err(e) => {
                tracing::warn!(label, "OTP send failed: {}", e);
                self.notifier.publish(Notice::error(if e.is_rejection() {
                    "Failed to send OTP"
                } else {
                    "Error sending OTP"
                }));
                Err(e.into())
            }
        }
    }

    /// Re-dispatch the OTP for the value it was first sent to. The value was
    /// validated by the original send and is not checked again.
    pub async fn resend(&self, company_id: &str, label: &str) -> Result<(), OtpError> {
        let (ticket, value) = {
            let mut sessions = self.sessions.write();
            let Some(session) = sessions.get_mut(label).filter(|s| s.sent) else {
                return Err(OtpError::NotSent(label.into()));
            };
            if session.verified {
                return Err(OtpError::AlreadyVerified(label.into()));
            }
            if session.pending.is_some() {
                return Err(OtpError::Busy(label.into()));
            }
            if !session.can_resend() {
                return Err(OtpError::ResendLocked(session.countdown_seconds.unwrap_or(0)));
            }
            let Some(value) = session.value.clone() else {
                return Err(OtpError::NotSent(label.into()));
            };
            let ticket = self.next_ticket();
            session.pending = Some(Pending::Resend);
            session.loading = true;
            session.ticket = ticket;
            (ticket, value)
        };

        tracing::info!(label, "Resending OTP");
        let result = self.api.send_otp(company_id, &value).await;

        let applied = self.finish(label, ticket, |session| {
            session.pending = None;
            if result.is_ok() {
                session.countdown_seconds = Some(self.resend_after);
            }
        });
        if !applied {
            return Err(OtpError::Superseded(label.into()));
        }

        match result {
            Ok(()) => {
                self.start_countdown(label);
                self.notifier.publish(Notice::success("OTP resent successfully!"));
                Ok(())
            }
            Err(e) => {
                tracing::warn!(label, "OTP resend failed: {}", e);
                self.notifier.publish(Notice::error(if e.is_rejection() {
                    "Failed to resend OTP"
                } else {
                    "Error resending OTP"
                }));
                Err(e.into())
            }
        }
    }

    /// Check `code` against the OTP sent for `label`. A wrong code leaves the
    /// session in `Sent` so the visitor can try again without resending.
    pub async fn verify(&self, company_id: &str, label: &str, code: &str) -> Result<(), OtpError> {
        let (ticket, value) = {
            let mut sessions = self.sessions.write();
            let Some(session) = sessions.get_mut(label).filter(|s| s.sent) else {
                return Err(OtpError::NotSent(label.into()));
            };
            if session.verified {
                return Err(OtpError::AlreadyVerified(label.into()));
            }
            if session.pending.is_some() {
                return Err(OtpError::Busy(label.into()));
            }
            if code.trim().is_empty() {
                return Err(ValidationError::new(label, "Please enter the OTP.").into());
            }
            let Some(value) = session.value.clone() else {
                return Err(OtpError::NotSent(label.into()));
            };
            let ticket = self.next_ticket();
            session.pending = Some(Pending::Verify);
            session.loading = true;
            session.ticket = ticket;
            (ticket, value)
        };

        tracing::info!(label, "Verifying OTP");
        let result = self.api.verify_otp(company_id, &value, code.trim()).await;

        let applied = self.finish(label, ticket, |session| {
            session.pending = None;
            if result.is_ok() {
                session.verified = true;
            }
        });
        if !applied {
            return Err(OtpError::Superseded(label.into()));
        }

        match result {
            Ok(()) => {
                tracing::info!(label, "OTP verified");
                self.notifier.publish(Notice::success("OTP verified!"));
                Ok(())
            }
            Err(e) => {
                tracing::warn!(label, "OTP verification failed: {}", e);
                self.notifier.publish(Notice::error(if e.is_rejection() {
                    "Incorrect OTP"
                } else {
                    "OTP verification failed"
                }));
                Err(e.into())
            }
        }
    }

    /// The field's value changed: any session bound to a different value,
    /// including a verified one, is discarded.
    pub fn value_changed(&self, label: &str, value: &str) {
        let stale = self
            .sessions
            .read()
            .get(label)
            .is_some_and(|s| !s.is_idle() && s.value.as_deref() != Some(value));
        if stale {
            tracing::debug!(label, "Value changed, resetting OTP session");
            self.reset(label);
        }
    }

    /// Back to `Idle`; cancels the countdown and orphans any in-flight request.
    pub fn reset(&self, label: &str) {
        self.sessions.write().remove(label);
        self.timers.lock().remove(label);
    }

    pub fn reset_all(&self) {
        self.sessions.write().clear();
        self.timers.lock().clear();
    }

    fn next_ticket(&self) -> u64 {
        self.tickets.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Apply `update` if the session still belongs to `ticket`.
    fn finish(&self, label: &str, ticket: u64, update: impl FnOnce(&mut OtpSession)) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(label) {
            Some(session) if session.ticket == ticket => {
                update(session);
                session.loading = session.pending.is_some();
                true
            }
            _ => {
                tracing::debug!(label, ticket, "Dropping superseded OTP response");
                false
            }
        }
    }

    fn start_countdown(&self, label: &str) {
        let timer = CountdownTimer::start(label.to_string(), Arc::clone(&self.sessions));
        // Replacing the entry drops, and so aborts, any previous countdown.
        self.timers.lock().insert(label.to_string(), timer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notice::NoticeLevel;
    use crate::testing::{mobile_field, FakeApi, Failure, GOOD_OTP};

    const MOBILE: &str = "9876543210";

    fn coordinator(api: &Arc<FakeApi>) -> (OtpCoordinator, tokio::sync::broadcast::Receiver<Notice>) {
        let notifier = Notifier::new();
        let rx = notifier.subscribe();
        (OtpCoordinator::new(api.clone(), notifier, 180), rx)
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[test]
    fn test_validate_for_send() {
        let field = mobile_field(10, 10);
        assert_eq!(
            validate_for_send(&field, "98765abc10").unwrap_err().message,
            "\"Mobile No\" must contain only digits."
        );
        assert_eq!(
            validate_for_send(&field, "98765").unwrap_err().message,
            "\"Mobile No\" must be between 10-10 digits."
        );
        assert!(validate_for_send(&field, MOBILE).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_value_never_hits_network() {
        let api = FakeApi::new();
        let (otp, _rx) = coordinator(&api);
        let err = otp.send("c1", &mobile_field(10, 10), "12345").await.unwrap_err();
        assert!(matches!(err, OtpError::Validation(_)));
        assert!(api.sent().is_empty());
        assert!(otp.session("Mobile No").is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_starts_countdown() {
        let api = FakeApi::new();
        let (otp, mut rx) = coordinator(&api);
        otp.send("c1", &mobile_field(10, 10), MOBILE).await.unwrap();

        let session = otp.session("Mobile No");
        assert!(session.sent);
        assert!(!session.verified);
        assert!(!session.loading);
        assert_eq!(session.countdown_seconds, Some(180));
        assert_eq!(session.phase(), OtpPhase::Sent);
        assert!(session.locks_field());
        assert_eq!(api.sent(), vec![MOBILE.to_string()]);
        assert_eq!(rx.recv().await.unwrap(), Notice::success("OTP sent successfully!"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_is_monotonic() {
        let api = FakeApi::new();
        let (otp, _rx) = coordinator(&api);
        otp.send("c1", &mobile_field(10, 10), MOBILE).await.unwrap();

        sleep_ms(500).await;
        let mut previous = otp.session("Mobile No").countdown_seconds.unwrap();
        assert_eq!(previous, 180);
        for _ in 0..179 {
            sleep_ms(1000).await;
            let current = otp.session("Mobile No").countdown_seconds.unwrap();
            assert_eq!(current, previous - 1);
            assert!(current > 0);
            assert!(!otp.session("Mobile No").can_resend());
            previous = current;
        }
        assert_eq!(previous, 1);

        sleep_ms(1000).await;
        let session = otp.session("Mobile No");
        assert_eq!(session.countdown_seconds, Some(0));
        assert!(session.can_resend());
        assert!(!session.locks_field());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resend_locked_until_zero() {
        let api = FakeApi::new();
        let (otp, mut rx) = coordinator(&api);
        otp.send("c1", &mobile_field(10, 10), MOBILE).await.unwrap();
        let _ = rx.recv().await;

        let err = otp.resend("c1", "Mobile No").await.unwrap_err();
        assert!(matches!(err, OtpError::ResendLocked(180)));

        sleep_ms(180_500).await;
        otp.resend("c1", "Mobile No").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Notice::success("OTP resent successfully!"));
        assert_eq!(otp.session("Mobile No").countdown_seconds, Some(180));
        assert_eq!(api.sent().len(), 2);

        // Off the tick boundary of the restarted timer.
        sleep_ms(1_500).await;
        assert_eq!(otp.session("Mobile No").countdown_seconds, Some(179));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_returns_to_idle() {
        let api = FakeApi::new();
        api.fail_send(Some(Failure::Network));
        let (otp, mut rx) = coordinator(&api);

        assert!(otp.send("c1", &mobile_field(10, 10), MOBILE).await.is_err());
        assert_eq!(otp.session("Mobile No").phase(), OtpPhase::Idle);
        assert_eq!(rx.recv().await.unwrap(), Notice::error("Error sending OTP"));

        api.fail_send(Some(Failure::Rejected));
        assert!(otp.send("c1", &mobile_field(10, 10), MOBILE).await.is_err());
        assert_eq!(rx.recv().await.unwrap().text, "Failed to send OTP");

        api.fail_send(None);
        otp.send("c1", &mobile_field(10, 10), MOBILE).await.unwrap();
        assert!(otp.session("Mobile No").sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_code_stays_sent() {
        let api = FakeApi::new();
        let (otp, mut rx) = coordinator(&api);
        otp.send("c1", &mobile_field(10, 10), MOBILE).await.unwrap();
        let _ = rx.recv().await;

        assert!(otp.verify("c1", "Mobile No", "0000").await.is_err());
        assert_eq!(otp.session("Mobile No").phase(), OtpPhase::Sent);
        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.level, NoticeLevel::Error);
        assert_eq!(notice.text, "Incorrect OTP");

        otp.verify("c1", "Mobile No", GOOD_OTP).await.unwrap();
        assert!(otp.is_verified("Mobile No"));
        assert_eq!(api.verified().last().unwrap(), &(MOBILE.to_string(), GOOD_OTP.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_after_countdown_is_honoured() {
        let api = FakeApi::new();
        let (otp, _rx) = coordinator(&api);
        otp.send("c1", &mobile_field(10, 10), MOBILE).await.unwrap();
        sleep_ms(200_000).await;
        otp.verify("c1", "Mobile No", GOOD_OTP).await.unwrap();
        assert_eq!(otp.session("Mobile No").phase(), OtpPhase::Verified);
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_change_resets_verified_session() {
        let api = FakeApi::new();
        let (otp, _rx) = coordinator(&api);
        otp.send("c1", &mobile_field(10, 10), MOBILE).await.unwrap();
        otp.verify("c1", "Mobile No", GOOD_OTP).await.unwrap();
        assert!(otp.session("Mobile No").locks_field());

        otp.value_changed("Mobile No", MOBILE);
        assert!(otp.is_verified("Mobile No"));

        otp.value_changed("Mobile No", "9876543211");
        let session = otp.session("Mobile No");
        assert!(!session.sent);
        assert!(!session.verified);
        assert!(!session.loading);
        assert_eq!(session.countdown_seconds, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_countdown() {
        let api = FakeApi::new();
        let (otp, _rx) = coordinator(&api);
        otp.send("c1", &mobile_field(10, 10), MOBILE).await.unwrap();
        otp.reset("Mobile No");
        sleep_ms(5_000).await;
        assert!(otp.session("Mobile No").is_idle());
        assert!(otp.timers.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_requires_send() {
        let api = FakeApi::new();
        let (otp, _rx) = coordinator(&api);
        let err = otp.verify("c1", "Mobile No", GOOD_OTP).await.unwrap_err();
        assert!(matches!(err, OtpError::NotSent(_)));
        assert!(api.verified().is_empty());
    }
}
