//! lamg: recursive algebraic multigrid for lattice operators
//!
//! This crate builds multigrid hierarchies for sparse nearest-neighbour operators on
//! periodic structured lattices. Coarse spaces are spanned by adaptively computed
//! near-kernel vectors, aggregated over geometric blocks; coarse operators are formed by
//! Galerkin projection and the hierarchy is applied as a flexible preconditioner inside
//! Krylov solvers.

pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod matrix;
pub mod multigrid;
pub mod preconditioner;
pub mod solver;
pub mod utils;

// Re-exports for convenience
pub use config::*;
pub use context::*;
pub use crate::core::*;
pub use error::*;
pub use matrix::*;
pub use multigrid::{Level, LevelOperators, Multigrid, Transfer};
pub use preconditioner::*;
pub use solver::*;
pub use utils::*;

// Re-export SolveStats at the crate root for convenience
pub use utils::convergence::SolveStats;
