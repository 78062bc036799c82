//! Parameter bookkeeping of a global fit
//!
//! Every dataset has the same `npar` parameter slots. [ParameterSpec] says which slots are shared
//! by all datasets and which are fixed per dataset, [LinkTable] maps each slot onto the reduced
//! vector of free parameters actually seen by the optimizer, and [flatten]/[inflate] move dense
//! `(nsets, npar)` matrices (initial guess, bounds, fitted values) between the two
//! representations.

pub mod broadcast;
pub use broadcast::{BoundsSpec, BroadcastSpec, flatten, inflate};

pub mod link_table;
pub use link_table::{Link, LinkTable, ParameterSpec};
