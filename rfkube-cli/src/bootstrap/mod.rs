//! Host prerequisites
//!
//! - Prerequisite checking against the built-in dependency catalog
//! - Auto-installation of missing binaries (`INSTALL_DEPS`)
//! - Report printing for `rfkube check-deps`

pub mod installer;
pub mod prereq;
pub mod report;

pub use prereq::{check_prerequisites, ensure_prerequisites, PrereqResult};
pub use report::print_report;
