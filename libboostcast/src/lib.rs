//! Boostcast - boost a source account's posts through every subscriber
//!
//! Core library providing the subscriber registry, the idempotency ledger,
//! persisted state, the dispatch and command loops and the authorization flow.

pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod messages;
pub mod oauth;
pub mod onboarding;
pub mod platforms;
pub mod registry;
pub mod state;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use commands::{Command, CommandHandler, CommandOutcome, CommandSettings};
pub use config::Config;
pub use dispatch::{CycleReport, DispatchSettings, Dispatcher};
pub use error::{BoostcastError, Result};
pub use registry::{LevelPolicy, Registry};
pub use state::BotState;
pub use store::{Document, StateStore};
pub use types::{CredentialPair, PostId, PreferenceLevel, Statistics, Subscriber, SubscriberId};
