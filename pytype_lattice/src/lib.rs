//! The type lattice for pytype-infer.
//!
//! Mirrors `kailua_types::ty`: a closed sum of type variants with
//! join/meet/subtype/attribute/substitution operations, decoupled from the
//! mutable environment that allocates fresh variables via a `TypeContext`
//! trait the constraint store (in `pytype_store`) implements.
//!
//! The "visitor" dispatch the original Python implementation used is
//! replaced outright by native `match` — Rust's exhaustiveness checking
//! already gives us the guarantee a visitor object exists to simulate.

pub mod class;
pub mod mro;
pub mod ty;

pub use class::Class;
pub use mro::Mro;
pub use ty::{ConstValue, ConstantType, FunctionType, InstanceType, Type, TypeContext, UnionType, Variable};
