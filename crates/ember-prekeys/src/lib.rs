//! Pre-key rotation for Ember.
//!
//! Keeps a pool of one-time prekeys and a rotating signed prekey registered
//! with the key distribution service, disables outbound sending after a
//! sustained run of rejected registrations, and prunes expired signed
//! prekeys without ever deleting one a peer might still use.

pub mod client;
pub mod environment;
pub mod error;
pub mod lockout;
pub mod memory_store;
pub mod policy;
pub mod refresh;
pub mod registration;
pub mod retention;
pub mod service;
pub mod sqlite_store;
pub mod store;

pub use client::{KeyDistributionClient, RegistrationRequest};
pub use environment::{AppEnvironment, Clock, ManualClock, StaticEnvironment, SystemClock};
pub use error::PreKeyError;
pub use lockout::LockoutState;
pub use memory_store::MemoryKeyStore;
pub use policy::RotationPolicy;
pub use refresh::{RefreshOutcome, SignedPreKeyRotation};
pub use registration::{RegistrationMode, RegistrationOutcome};
pub use retention::PruneReport;
pub use service::{CheckOutcome, RotationHandle, RotationService};
pub use sqlite_store::SqliteKeyStore;
pub use store::{IdentityKeyStore, KeyStore, LockoutStore, PreKeyStore, SignedPreKeyStore};
