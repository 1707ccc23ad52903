//! Configuration of the multigrid hierarchy.

pub mod options;
pub use options::{
    CycleType, LevelOptions, Location, MAX_LEVELS, MatPcType, MgFlags, MgOptions,
    NullSpaceSource, RolePrecision, SetupType, SolutionType, SolveType, Verbosity,
};
