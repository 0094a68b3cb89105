//! Structural closure: fixpoint-expand a seed set of types by descending
//! into every instance's effective structure (and every function's
//! arguments/return, and every union's members) until no new type is
//! discovered. Shared between the Datalog and SAT encoders — grounded on
//! `datalog_encoder.py`'s `_GetInterestingTypes` and `sat_encoder.py`'s
//! near-identical `_ComputeUniverse`.

use std::collections::BTreeSet;

use pytype_lattice::Type;

/// A hook that may inject additional types into the closure before it is
/// returned, used by `solve_iterate` to widen the universe between rounds
/// with newly discovered variable bounds.
pub trait TypeProcessor {
    fn process(&mut self, seen: &BTreeSet<Type>) -> Vec<Type>;
}

pub struct NoopProcessor;

impl TypeProcessor for NoopProcessor {
    fn process(&mut self, _seen: &BTreeSet<Type>) -> Vec<Type> {
        Vec::new()
    }
}

fn expand_one(t: &Type, out: &mut BTreeSet<Type>) {
    if !out.insert(t.clone()) {
        return;
    }
    match t {
        Type::Function(f) => {
            for a in &f.args {
                expand_one(a, out);
            }
            expand_one(&f.ret, out);
        }
        Type::Instance(i) => {
            for member in i.effective_structure().values() {
                expand_one(member, out);
            }
        }
        Type::Union(u) => {
            for m in &u.members {
                expand_one(m, out);
            }
        }
        Type::Constant(c) => expand_one(&c.value_type, out),
        Type::Top | Type::Bottom | Type::Dynamic | Type::Variable(_) => {}
    }
}

/// Computes the structural closure of `seeds`, always including `Top` and
/// `Bottom` so that they are available for clauses that compare against
/// the lattice extremes, then repeatedly consulting `processor` until it
/// stops contributing new types.
pub fn structural_closure(seeds: impl IntoIterator<Item = Type>, processor: &mut dyn TypeProcessor) -> BTreeSet<Type> {
    let mut universe = BTreeSet::new();
    expand_one(&Type::Top, &mut universe);
    expand_one(&Type::Bottom, &mut universe);
    for t in seeds {
        expand_one(&t, &mut universe);
    }
    loop {
        let extra = processor.process(&universe);
        if extra.is_empty() {
            break;
        }
        let before = universe.len();
        for t in extra {
            expand_one(&t, &mut universe);
        }
        if universe.len() == before {
            break;
        }
    }
    universe
}

#[cfg(test)]
mod tests {
    use super::*;
    use pytype_lattice::{Class, Mro};
    use std::collections::BTreeMap;

    #[test]
    fn closure_descends_into_instance_members() {
        let object = Class::new("object", BTreeMap::new(), BTreeMap::new());
        let mut members = BTreeMap::new();
        let inner = Type::instance(Mro::resolved(vec![object.clone()]), BTreeMap::new());
        members.insert("x".to_string(), inner.clone());
        let outer_class = Class::new("Outer", BTreeMap::new(), members);
        let outer = Type::instance(Mro::resolved(vec![outer_class, object]), BTreeMap::new());

        let universe = structural_closure(vec![outer.clone()], &mut NoopProcessor);
        assert!(universe.contains(&outer));
        assert!(universe.contains(&inner));
        assert!(universe.contains(&Type::Top));
        assert!(universe.contains(&Type::Bottom));
    }
}
