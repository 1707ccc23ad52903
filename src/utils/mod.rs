//! Solver bookkeeping and lattice colouring helpers.

pub mod coloring;
pub mod convergence;

pub use coloring::ProbeColoring;
pub use convergence::{Convergence, SolveStats};
