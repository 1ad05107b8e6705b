//! Host join orchestration for engine-managed virtualization clusters.
//!
//! This crate takes a freshly installed node and makes it an active
//! cluster member able to run the cluster's management VM: it
//! establishes trust with the engine endpoint, provisions the engine's
//! SSH access credential, opens an authenticated API session, registers
//! the host, and polls until it is operational.
//!
//! # Example
//!
//! ```rust,ignore
//! use hostjoin::context::{CancelToken, JoinContext};
//! use hostjoin::orchestrator::JoinOrchestrator;
//!
//! #[tokio::main]
//! async fn main() {
//!     let ctx = JoinContext::new("mgmt.example.org", "node-1.example.org");
//!     let orchestrator = JoinOrchestrator::new(
//!         &pki, &connector, &vds, &dialog, &dispatcher, CancelToken::new(),
//!     );
//!     match orchestrator.join(ctx).await {
//!         hostjoin::context::Outcome::Success(host) => println!("{} is up", host.name),
//!         other => eprintln!("{other:?}"),
//!     }
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod context;
pub mod dialog;
pub mod engine;
pub mod orchestrator;
pub mod pki;
pub mod poller;
pub mod registrar;
pub mod session;
pub mod sshkeys;
pub mod trust;
pub mod vds;

pub use context::{CancelToken, Credential, JoinContext, Outcome, Secret};
pub use orchestrator::{JoinError, JoinOrchestrator, Stage};
pub use poller::{PollConfig, ReadyOutcome};
pub use trust::{TrustAnchor, TrustError};
