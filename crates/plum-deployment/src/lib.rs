//! PLUM Deployment - phase execution, strategies, and orchestration
//!
//! The deployment side of the control plane. The orchestrator admits
//! requests and owns the active-deployment registry; each admitted
//! deployment is driven by its own task, which expands the strategy into
//! an ordered phase list, executes phases through the four-step runner
//! (prepare, act, observe, commit), consults the circuit breaker between
//! phases, and rolls back automatically on failure.
//!
//! ## Ownership
//!
//! A `Deployment` record is mutated only by the driver task executing it;
//! everything else reads cloned snapshots through the orchestrator.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod cancel;
pub mod context;
pub mod driver;
pub mod error;
pub mod orchestrator;
pub mod runner;
pub mod strategies;

pub use cancel::{CancelHandle, CancelToken};
pub use context::DeploymentContext;
pub use driver::DeploymentDriver;
pub use error::{DeploymentError, Result};
pub use orchestrator::{Orchestrator, OrchestratorConfig, ShutdownReport};
pub use strategies::{create_strategy, Strategy};
