//! Storecheck - uniform CRUD verification for heterogeneous data stores
//!
//! This crate holds the backend-independent half of storecheck: the adapter
//! contract, the verification protocol and the run report.
//!
//! # Overview
//!
//! Every configured backend instance is driven through the same fixed
//! protocol:
//!
//! 1. **Namespace setup**: create the table, collection or index
//! 2. **Seed insert**: write `test_key_1..3`
//! 3. **Read back**: read every seeded record
//! 4. **Update**: overwrite `test_key_1` and re-read it
//! 5. **Range scan**: list the seeded key range
//! 6. **Delete**: remove `test_key_2` and confirm absence
//! 7. **Cleanup**: remove the rest except `test_key_3`
//! 8. **Final check**: `test_key_3` survives with its value
//!
//! Backend drivers live in `storecheck-backends`; this crate only sees them
//! through [`Adapter`] and [`Establish`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use storecheck_core::{CheckConfig, Coordinator};
//! use storecheck_core::memory::{MemoryEstablisher, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> storecheck_core::Result<()> {
//!     let config = CheckConfig::load("config.yaml").await?;
//!     let establisher = MemoryEstablisher::new().with_host("pd-0", MemoryStore::new());
//!
//!     let coordinator = Coordinator::new(Arc::new(establisher), &config.settings);
//!     let report = coordinator.run_config(&config).await;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`types`]: Backend identity, key prefix, records and steps
//! - [`error`]: Error taxonomy and failure kinds
//! - [`config`]: YAML configuration
//! - [`timeout`]: Operation and visibility bounds
//! - [`poll`]: Bounded poll-until-visible
//! - [`adapter`]: Adapter and establisher contracts
//! - [`runner`]: The verification protocol
//! - [`coordinator`]: Concurrent multi-instance runs
//! - [`report`]: Results and the aggregated report
//! - [`memory`]: In-memory backend

pub mod error;
pub mod types;

pub mod config;
pub mod timeout;
pub mod poll;
pub mod adapter;

pub mod runner;
pub mod coordinator;
pub mod report;

pub mod memory;

// Re-export commonly used types
pub use adapter::{Adapter, Establish};
pub use config::{BackendConfig, CheckConfig, Settings, TlsSettings};
pub use coordinator::{verify_instance, Coordinator};
pub use error::{CheckError, FailureKind, Result};
pub use report::{Outcome, Reporter, VerificationReport, VerificationResult};
pub use runner::{SeedPlan, VerificationRunner};
pub use timeout::{OperationTimeout, PollConfig, TimeoutConfig};
pub use types::{BackendId, BackendKind, KeyPrefix, KeyValueRecord, Step};
