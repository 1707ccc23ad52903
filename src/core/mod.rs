//! Lattice geometry, fields, field kernels and the operator trait.

pub mod blas;
pub mod field;
pub mod lattice;
pub mod precision;
pub mod traits;

pub use field::{FieldParam, LatticeField, SiteSubset, SourceKind};
pub use lattice::Lattice;
pub use precision::Precision;
pub use traits::LinearOperator;
