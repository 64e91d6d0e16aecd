//! The poll loop: fetch, evaluate, notify, sleep
//!
//! One cooperative control flow. Session expiry re-authenticates without
//! touching the error counter; any other cycle failure backs off through
//! [`RetryState`] until the consecutive-error ceiling terminates the loop.
//! A shutdown flag is consulted only at iteration boundaries, so an
//! in-flight request is allowed to finish and its result is discarded.

use crate::client::{ApiClient, ApiError, Deal};
use crate::config::{Config, Thresholds};
use crate::notify::{format_alert, Notifier, NotifyError};
use crate::offers::{evaluate, Evaluation};
use crate::retry::{RetryPolicy, RetryState};
use crate::session::{Authenticator, Session, SessionStore};
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Source of deal batches. The production implementation is [`ApiClient`];
/// tests script one.
#[async_trait]
pub trait OfferFeed: Send + Sync {
    async fn fetch(&self, session: &Session) -> Result<Vec<Deal>, ApiError>;
}

#[async_trait]
impl OfferFeed for ApiClient {
    async fn fetch(&self, session: &Session) -> Result<Vec<Deal>, ApiError> {
        self.fetch_deals(&session.access_token, &session.session_key)
            .await
    }
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// Shutdown signal observed at an iteration boundary
    Shutdown,
    /// No session could be established at startup
    NoSession,
    /// The session expired mid-run and could not be replaced
    SessionLost,
    /// Too many consecutive failed cycles
    ErrorCeiling,
}

impl MonitorExit {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, MonitorExit::Shutdown)
    }
}

impl fmt::Display for MonitorExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            MonitorExit::Shutdown => "shutdown signal received",
            MonitorExit::NoSession => "no session could be established",
            MonitorExit::SessionLost => "session expired and re-authentication failed",
            MonitorExit::ErrorCeiling => "consecutive error limit reached",
        };
        write!(f, "{reason}")
    }
}

#[derive(Debug, Error)]
enum CycleError {
    #[error("session expired")]
    SessionExpired,

    #[error(transparent)]
    Fetch(ApiError),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

impl From<ApiError> for CycleError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::SessionExpired => CycleError::SessionExpired,
            other => CycleError::Fetch(other),
        }
    }
}

/// The watcher's poll loop and its process-lifetime state
pub struct Monitor<F: OfferFeed> {
    feed: F,
    notifier: Box<dyn Notifier>,
    thresholds: Thresholds,
    policy: RetryPolicy,
    errors: RetryState,
    notified: HashSet<String>,
    shutdown: Arc<AtomicBool>,
}

impl<F: OfferFeed> Monitor<F> {
    pub fn new(
        feed: F,
        notifier: Box<dyn Notifier>,
        config: &Config,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            feed,
            notifier,
            thresholds: config.thresholds.clone(),
            policy: config.retry.clone(),
            errors: RetryState::new(),
            notified: HashSet::new(),
            shutdown,
        }
    }

    /// Run until a shutdown signal or a fatal condition.
    pub async fn run(
        mut self,
        sessions: &mut SessionStore,
        auth: &mut dyn Authenticator,
    ) -> anyhow::Result<MonitorExit> {
        info!("Deal watcher starting");

        let Some(mut session) = sessions.ensure(auth).await? else {
            error!("Could not establish a session; exiting");
            return Ok(MonitorExit::NoSession);
        };

        self.announce("Deal watcher started.").await;

        let exit = loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break MonitorExit::Shutdown;
            }

            match self.cycle(&session).await {
                Ok(()) => {
                    self.errors.record_success();
                    let delay = self.policy.success_delay(&mut rand::thread_rng());
                    debug!("Waiting {:.2}s before next check", delay.as_secs_f64());
                    sleep(delay).await;
                }
                Err(CycleError::SessionExpired) => {
                    warn!("Session expired; re-authenticating");
                    sessions.invalidate();
                    match sessions.create(auth).await {
                        Ok(Some(fresh)) => session = fresh,
                        Ok(None) => {
                            error!("Re-authentication rejected; exiting");
                            break MonitorExit::SessionLost;
                        }
                        Err(err) => {
                            error!(error = %err, "Re-authentication failed; exiting");
                            break MonitorExit::SessionLost;
                        }
                    }
                }
                Err(err) => {
                    self.errors.record_failure();
                    error!(
                        error = %err,
                        "Cycle failed ({}/{})",
                        self.errors.consecutive_errors(),
                        self.policy.max_consecutive_errors
                    );

                    if self.errors.exhausted(&self.policy) {
                        error!("Too many consecutive errors; giving up");
                        break MonitorExit::ErrorCeiling;
                    }

                    let delay = self
                        .errors
                        .backoff_delay(&self.policy, &mut rand::thread_rng());
                    info!("Retrying in {:.2}s", delay.as_secs_f64());
                    sleep(delay).await;
                }
            }
        };

        self.announce("Deal watcher stopped.").await;
        info!(%exit, "Deal watcher stopped");
        Ok(exit)
    }

    /// One fetch-evaluate-notify pass. The dedup set is committed only after
    /// the notify step succeeds, so a failed send leaves its offers eligible
    /// for the next cycle.
    async fn cycle(&mut self, session: &Session) -> Result<(), CycleError> {
        debug!("Fetching offers");
        let deals = self.feed.fetch(session).await?;

        let Evaluation { fresh, notified } = evaluate(&deals, &self.thresholds, &self.notified);

        if fresh.is_empty() {
            info!(
                deals = deals.len(),
                watched = notified.len(),
                "No new interesting offers"
            );
        } else {
            info!("{} interesting offer(s) available:", fresh.len());
            for (i, offer) in fresh.iter().enumerate() {
                info!("Offer {}: Pay ${:.2} → Earn ${:.2}", i + 1, offer.pay, offer.earn);
            }
            self.notifier.send(&format_alert(&fresh)).await?;
        }

        self.notified = notified;
        Ok(())
    }

    /// Start/stop announcements are best-effort and never fail the loop.
    async fn announce(&self, message: &str) {
        if let Err(err) = self.notifier.send(message).await {
            warn!(error = %err, "Failed to deliver service announcement");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotifyConfig;
    use anyhow::Result;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    fn deal(id: &str, pay: i64, earn: i64) -> Deal {
        Deal {
            user_order_id: id.to_string(),
            amount_to_pay: pay.into(),
            cardholder_earnings: earn.into(),
        }
    }

    fn config(max_consecutive_errors: u32) -> Config {
        Config {
            api_base_url: "http://localhost".to_string(),
            session_file: PathBuf::from(".session.json"),
            thresholds: Thresholds {
                min_earn: dec!(50),
                max_pay: dec!(50),
                min_earn_per_pay: dec!(0),
            },
            retry: RetryPolicy {
                min_delay: Duration::ZERO,
                max_delay: Duration::from_millis(1),
                error_delay_increment: Duration::ZERO,
                max_consecutive_errors,
            },
            notify: NotifyConfig {
                enabled: false,
                bot_token: None,
                chat_id: None,
            },
        }
    }

    fn seeded_store(dir: &TempDir) -> SessionStore {
        let path = dir.path().join(".session.json");
        std::fs::write(&path, r#"{"accessToken":"tok","sessionKey":"key"}"#).unwrap();
        SessionStore::new(path)
    }

    /// Replays a fixed sequence of fetch results, then raises the shutdown
    /// flag so the loop winds down at the next boundary.
    struct ScriptedFeed {
        responses: Mutex<VecDeque<Result<Vec<Deal>, ApiError>>>,
        shutdown: Arc<AtomicBool>,
    }

    impl ScriptedFeed {
        fn new(
            responses: Vec<Result<Vec<Deal>, ApiError>>,
            shutdown: Arc<AtomicBool>,
        ) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                shutdown,
            }
        }
    }

    #[async_trait]
    impl OfferFeed for ScriptedFeed {
        async fn fetch(&self, _session: &Session) -> Result<Vec<Deal>, ApiError> {
            let mut responses = self.responses.lock().unwrap();
            let next = responses.pop_front().unwrap_or_else(|| Ok(Vec::new()));
            if responses.is_empty() {
                self.shutdown.store(true, Ordering::Relaxed);
            }
            next
        }
    }

    /// Records every send; can be told to fail the next N offer alerts.
    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<String>>>,
        failures_left: Mutex<u32>,
    }

    impl RecordingNotifier {
        fn new(fail_alerts: u32) -> (Self, Arc<Mutex<Vec<String>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            let notifier = Self {
                sent: sent.clone(),
                failures_left: Mutex::new(fail_alerts),
            };
            (notifier, sent)
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, message: &str) -> Result<(), NotifyError> {
            let is_alert = message.contains("offer(s) found");
            if is_alert {
                let mut failures = self.failures_left.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(NotifyError::Status(500));
                }
            }

            self.sent.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    struct ScriptedAuth {
        token: Option<String>,
        calls: u32,
    }

    #[async_trait]
    impl Authenticator for ScriptedAuth {
        async fn login(&mut self) -> Result<Option<String>> {
            self.calls += 1;
            Ok(self.token.clone())
        }
    }

    #[tokio::test]
    async fn fresh_offers_are_notified_once() {
        let dir = TempDir::new().unwrap();
        let mut sessions = seeded_store(&dir);
        let mut auth = ScriptedAuth {
            token: None,
            calls: 0,
        };
        let shutdown = Arc::new(AtomicBool::new(false));

        // The same batch twice: the second cycle must stay quiet.
        let feed = ScriptedFeed::new(
            vec![
                Ok(vec![deal("A", 10, 100), deal("B", 90, 100)]),
                Ok(vec![deal("A", 10, 100), deal("B", 90, 100)]),
            ],
            shutdown.clone(),
        );
        let (notifier, sent) = RecordingNotifier::new(0);

        let monitor = Monitor::new(feed, Box::new(notifier), &config(3), shutdown);
        let exit = monitor.run(&mut sessions, &mut auth).await.unwrap();

        assert_eq!(exit, MonitorExit::Shutdown);
        assert_eq!(auth.calls, 0);

        let sent = sent.lock().unwrap();
        let alerts: Vec<_> = sent.iter().filter(|m| m.contains("offer(s) found")).collect();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("Pay $10.00 → Earn $100.00"));
        assert!(!alerts[0].contains("$90.00"));
    }

    #[tokio::test]
    async fn error_ceiling_terminates_the_loop() {
        let dir = TempDir::new().unwrap();
        let mut sessions = seeded_store(&dir);
        let mut auth = ScriptedAuth {
            token: None,
            calls: 0,
        };
        let shutdown = Arc::new(AtomicBool::new(false));

        let failure = || {
            Err(ApiError::Status {
                status: 500,
                msg: "boom".to_string(),
            })
        };
        let feed = ScriptedFeed::new(
            vec![failure(), failure(), failure(), Ok(Vec::new())],
            shutdown.clone(),
        );
        let (notifier, sent) = RecordingNotifier::new(0);

        let monitor = Monitor::new(feed, Box::new(notifier), &config(3), shutdown);
        let exit = monitor.run(&mut sessions, &mut auth).await.unwrap();

        assert_eq!(exit, MonitorExit::ErrorCeiling);
        assert!(exit.is_fatal());

        // Announcements only; no offer alert was ever sent.
        let sent = sent.lock().unwrap();
        assert!(sent.iter().all(|m| !m.contains("offer(s) found")));
    }

    #[tokio::test]
    async fn expiry_reauthenticates_without_counting_an_error() {
        let dir = TempDir::new().unwrap();
        let mut sessions = seeded_store(&dir);
        let mut auth = ScriptedAuth {
            token: Some("fresh-token".to_string()),
            calls: 0,
        };
        let shutdown = Arc::new(AtomicBool::new(false));

        let feed = ScriptedFeed::new(
            vec![Err(ApiError::SessionExpired), Ok(Vec::new())],
            shutdown.clone(),
        );
        let (notifier, _sent) = RecordingNotifier::new(0);

        // With a ceiling of one, counting the expiry would end the run as
        // ErrorCeiling instead of a clean shutdown.
        let monitor = Monitor::new(feed, Box::new(notifier), &config(1), shutdown);
        let exit = monitor.run(&mut sessions, &mut auth).await.unwrap();

        assert_eq!(exit, MonitorExit::Shutdown);
        assert_eq!(auth.calls, 1);

        let persisted =
            std::fs::read_to_string(dir.path().join(".session.json")).unwrap();
        assert!(persisted.contains("fresh-token"));
    }

    #[tokio::test]
    async fn failed_reauthentication_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut sessions = seeded_store(&dir);
        let mut auth = ScriptedAuth {
            token: None,
            calls: 0,
        };
        let shutdown = Arc::new(AtomicBool::new(false));

        let feed = ScriptedFeed::new(vec![Err(ApiError::SessionExpired)], shutdown.clone());
        let (notifier, _sent) = RecordingNotifier::new(0);

        let monitor = Monitor::new(feed, Box::new(notifier), &config(3), shutdown);
        let exit = monitor.run(&mut sessions, &mut auth).await.unwrap();

        assert_eq!(exit, MonitorExit::SessionLost);
        assert_eq!(auth.calls, 1);
    }

    #[tokio::test]
    async fn failed_notification_keeps_offers_eligible() {
        let dir = TempDir::new().unwrap();
        let mut sessions = seeded_store(&dir);
        let mut auth = ScriptedAuth {
            token: None,
            calls: 0,
        };
        let shutdown = Arc::new(AtomicBool::new(false));

        let feed = ScriptedFeed::new(
            vec![
                Ok(vec![deal("A", 10, 100)]),
                Ok(vec![deal("A", 10, 100)]),
            ],
            shutdown.clone(),
        );
        // First alert fails; the offer must be re-announced next cycle.
        let (notifier, sent) = RecordingNotifier::new(1);

        let monitor = Monitor::new(feed, Box::new(notifier), &config(3), shutdown);
        let exit = monitor.run(&mut sessions, &mut auth).await.unwrap();

        assert_eq!(exit, MonitorExit::Shutdown);

        let sent = sent.lock().unwrap();
        let alerts: Vec<_> = sent.iter().filter(|m| m.contains("offer(s) found")).collect();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("Earn $100.00"));
    }

    #[tokio::test]
    async fn missing_session_at_startup_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut sessions = SessionStore::new(dir.path().join(".session.json"));
        let mut auth = ScriptedAuth {
            token: None,
            calls: 0,
        };
        let shutdown = Arc::new(AtomicBool::new(false));

        let feed = ScriptedFeed::new(Vec::new(), shutdown.clone());
        let (notifier, _sent) = RecordingNotifier::new(0);

        let monitor = Monitor::new(feed, Box::new(notifier), &config(3), shutdown);
        let exit = monitor.run(&mut sessions, &mut auth).await.unwrap();

        assert_eq!(exit, MonitorExit::NoSession);
        assert!(exit.is_fatal());
        assert_eq!(auth.calls, 1);
    }
}
