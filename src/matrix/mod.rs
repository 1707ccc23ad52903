//! Matrix module: dense site-block kernels, stencil operators and their Schur complements.

pub mod dense;
pub use dense::ComplexLu;
pub mod schur;
pub use schur::SchurOperator;
pub mod stencil;
pub use stencil::{StencilBuilder, StencilOperator};
