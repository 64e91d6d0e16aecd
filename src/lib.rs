//! Cashback deal watcher
//!
//! Polls a cashback marketplace's "available orders" endpoint, keeps only
//! the deals that clear the configured economics, deduplicates offers that
//! were already announced, and pushes fresh ones to a Telegram chat.
//!
//! A session (bearer token plus a locally generated session key) is loaded
//! from disk, created through the vendor's OTP login when missing, and
//! rebuilt when the server reports it expired mid-run.

pub mod client;
pub mod config;
pub mod keys;
pub mod monitor;
pub mod notify;
pub mod offers;
pub mod retry;
pub mod session;

pub use client::{ApiClient, ApiError, Deal, LoginOutcome};
pub use config::{Config, NotifyConfig, Thresholds};
pub use monitor::{Monitor, MonitorExit, OfferFeed};
pub use notify::{LogNotifier, Notifier, NotifyError, TelegramNotifier};
pub use offers::{evaluate, Evaluation, Offer};
pub use retry::{RetryPolicy, RetryState};
pub use session::{
    Authenticator, CredentialPrompt, OtpAuthenticator, Session, SessionStore, StdinPrompt,
};
