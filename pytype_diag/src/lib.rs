//! Diagnostics shared across the `pytype_lattice` and `pytype_store` crates.
//!
//! This mirrors the `Report`/`Reporter` split that `kailua_diag` uses to
//! decouple "something worth telling the caller" from "how it gets shown",
//! but drops everything tied to source text or a terminal: this crate has no
//! notion of a source file, only the bytecode offset the abstract
//! interpreter was at when a diagnostic was raised.

pub mod error;
pub mod report;

pub use error::{LatticeError, SolverError, StoreError};
pub use report::{BcOffset, CollectedReport, Kind, LogReport, NoReport, Report, Reporter, Stop};
