//! Context module for lamg.
//!
//! This module provides context/factory types for configuring the solvers used inside the
//! hierarchy and for the per-level logging context.
//!
//! Modules:
//! - [`ksp_context`]: solver kinds, solver parameters and the solver factory.
//! - [`log_context`]: level-prefixed, verbosity-gated logging.

pub mod ksp_context;
pub use ksp_context::{SolverKind, SolverParam, create_solver};
pub mod log_context;
pub use log_context::LevelContext;
