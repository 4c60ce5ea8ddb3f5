//! Core library for rfkube
//!
//! Holds the pieces of the cluster lifecycle orchestrator that do not depend
//! on a specific backend technology:
//! - Backend catalog and cluster state records
//! - Registry address resolution and runtime credentials
//! - The Helm deployment planner
//! - The timeout-bounded readiness poller
//! - Seams for external commands and HTTP probes
//! - Host probing, kubeconfig handles, settings and run summaries

pub mod backend;
pub mod credentials;
pub mod error;
pub mod exec;
pub mod host;
pub mod kubeconfig;
pub mod plan;
pub mod poll;
pub mod registry;
pub mod settings;
pub mod state;
pub mod summary;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use backend::{BackendDescriptor, BackendId, RegistryProvisioner};
pub use credentials::RuntimeCredentials;
pub use error::{Error, ErrorKind, Result};
pub use exec::{CmdOutput, CommandRunner, DuctRunner, HttpProbe, Invocation, ReqwestProbe};
pub use host::HostInfo;
pub use kubeconfig::KubeconfigGuard;
pub use plan::{DeploymentPlan, ImageSource, PlanRequest, PullSecret};
pub use poll::{Check, PollSpec, PollTimeout, poll_until};
pub use registry::{RegistryInputs, RegistryMode, RegistrySpec};
pub use settings::{EnvSnapshot, Settings};
pub use state::{ClusterPhase, ClusterState, StateStore};
pub use summary::{BackendOutcome, BackendResult, TestRunSummary};

/// Current version of rfkube, shared by every workspace crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
