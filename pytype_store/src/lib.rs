//! Constraint store, simplification pipeline, and the Datalog/SAT solver
//! backends (components D, E, F, G).

pub mod closure;
pub mod datalog;
pub mod importer;
pub mod sat;
pub mod store;

pub use closure::{structural_closure, NoopProcessor, TypeProcessor};
pub use datalog::{DatalogConfig, DatalogEncoder};
pub use importer::{import_declarations, unknown_declaration_to_dynamic, Declaration, ImportedModule, MethodDecl};
pub use sat::{engine::SatEngine, SatConfig, SatEncoder};
pub use store::{Constraint, ConstraintStore, ConstraintTag, StoreSnapshot};
