//! Typed errors for the five recognized error categories. Kept as plain
//! `thiserror` enums rather than the `Report`-based diagnostics in
//! `report.rs`: these are the errors library functions *return*, while
//! `Report` is for diagnostics an abstract interpreter wants surfaced
//! without aborting the call that produced them.

use thiserror::Error;

/// Errors raised by `pytype_lattice` (MRO construction, and the handful of
/// lattice operations that can observe an internal inconsistency).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LatticeError {
    /// C3 linearization found no valid head to emit next. Fatal to the
    /// construction of the class whose MRO was being computed.
    #[error("illegal inheritance: no consistent method resolution order for {class_name:?}")]
    IllegalInheritance { class_name: String },

    /// `Mro::resolve` was called on a handle that already has classes.
    #[error("MRO is already resolved")]
    MroAlreadyResolved,

    /// A lattice operation (join/meet/subtype) observed two types whose
    /// variants should never be compared given how the abstract interpreter
    /// is supposed to call into the lattice (e.g. joining a `Function` with
    /// a raw internal placeholder). This indicates a bug in the caller,
    /// not in the program being analyzed.
    #[error("type-kind mismatch in {operation}: {left} vs {right}")]
    TypeKindMismatch { operation: &'static str, left: String, right: String },
}

/// Errors raised by `pytype_store::ConstraintStore`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error(transparent)]
    Lattice(#[from] LatticeError),

    /// A declaration fed to the builtin importer (component G) was of a
    /// kind the importer does not understand. This is logged and mapped to
    /// `Type::Dynamic`, not fatal — the variant exists
    /// so callers that want to know it happened can still observe it.
    #[error("unsupported declaration: {name} ({kind})")]
    UnsupportedDeclaration { name: String, kind: String },
}

/// Errors raised by the Datalog and SAT encoders in `pytype_store`.
#[derive(Error, Debug)]
pub enum SolverError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The solver reported the constraint set as unsatisfiable, or produced
    /// no usable bounds. Callers should treat an empty
    /// bounds mapping as "no inference", not as a hard failure; this
    /// variant is for encoders that want to distinguish the two rather than
    /// silently returning an empty map.
    #[error("constraint set has no solution")]
    Unsatisfiable,

    /// The external Datalog evaluator (or, in principle, any other
    /// subprocess collaborator) could not be spawned or exited abnormally.
    /// This propagates to the caller with no partial results.
    #[error("external solver subprocess failed: {0}")]
    SubprocessFailure(String),

    #[error("failed to parse solver output: {0}")]
    OutputParse(String),

    /// The in-process SAT backend failed outside of plain unsatisfiability
    /// (a lower-level `varisat` error). Kept distinct from
    /// `SubprocessFailure` since no subprocess is involved.
    #[error("SAT backend failed: {0}")]
    SatFailure(String),
}
