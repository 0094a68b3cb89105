//! The SAT solver backend (component F). Grounded on
//! `original_source/byterun/constraint/sat_encoder.py`: one boolean
//! proposition per candidate `(sub, sup)` pair drawn from the structural
//! closure, clause families pinning down the ones the lattice already
//! knows plus the ones implied by structure, two rounds of solve-then-
//! widen-then-resolve (`solve_iterate`), decoded to per-variable bounds.

pub mod engine;

use std::collections::{BTreeMap, BTreeSet};

use pytype_diag::{SolverError, StoreError};
use pytype_lattice::{Type, TypeContext, Variable};
use varisat::Lit;

use crate::closure::{structural_closure, NoopProcessor, TypeProcessor};
use crate::store::{ConstraintStore, ConstraintTag};
use engine::SatEngine;

/// Knobs the original module hard-coded as globals.
#[derive(Clone, Copy, Debug)]
pub struct SatConfig {
    pub use_transitivity_constraints: bool,
    pub use_concrete_solution_constraints: bool,
    pub iterations: u32,
}

impl Default for SatConfig {
    fn default() -> SatConfig {
        SatConfig { use_transitivity_constraints: true, use_concrete_solution_constraints: true, iterations: 2 }
    }
}

fn seeds_from_store(store: &ConstraintStore) -> Vec<Type> {
    let mut seeds = Vec::new();
    for c in store.active() {
        seeds.push(c.left.clone());
        seeds.push(c.right.clone());
    }
    for t in store.targets() {
        seeds.push(t.clone());
    }
    seeds
}

struct WideningProcessor {
    extra: Vec<Type>,
}

impl TypeProcessor for WideningProcessor {
    fn process(&mut self, _seen: &BTreeSet<Type>) -> Vec<Type> {
        std::mem::take(&mut self.extra)
    }
}

/// Builds and solves one round's CNF instance over a fixed universe of
/// types, exposing the decoded true `subtype(a, b)` propositions.
pub struct SatEncoder {
    config: SatConfig,
}

impl SatEncoder {
    pub fn new(config: SatConfig) -> SatEncoder {
        SatEncoder { config }
    }

    fn solve_once(&self, store: &mut ConstraintStore, universe: &BTreeSet<Type>) -> Result<Vec<(Type, Type)>, SolverError> {
        let types: Vec<Type> = universe.iter().cloned().collect();
        let mut engine = SatEngine::new();
        let mut props: BTreeMap<(Type, Type), Lit> = BTreeMap::new();

        for a in &types {
            for b in &types {
                if a == b {
                    continue;
                }
                let lit = engine.fresh_var().positive();
                props.insert((a.clone(), b.clone()), lit);
            }
        }
        let prop = |props: &BTreeMap<(Type, Type), Lit>, a: &Type, b: &Type| -> Option<Lit> {
            if a == b {
                None
            } else {
                props.get(&(a.clone(), b.clone())).copied()
            }
        };

        // Known: pairs with no variable on either side are already decided
        // by the closed-form lattice predicate.
        for a in &types {
            for b in &types {
                if a == b || a.contains_variable() || b.contains_variable() {
                    continue;
                }
                if let Some(lit) = prop(&props, a, b) {
                    if let Ok(v) = a.is_subtype_closed(b) {
                        engine.assign(lit, v);
                    }
                }
            }
        }

        // Function/Instance are always incomparable.
        for a in &types {
            for b in &types {
                if matches!(a, Type::Function(_)) && matches!(b, Type::Instance(_))
                    || matches!(a, Type::Instance(_)) && matches!(b, Type::Function(_))
                {
                    if let Some(lit) = prop(&props, a, b) {
                        engine.assign(lit, false);
                    }
                }
            }
        }

        // Function-structural: contravariant args, covariant return.
        for a in &types {
            for b in &types {
                let (f1, f2) = match (a, b) {
                    (Type::Function(f1), Type::Function(f2)) if f1.args.len() == f2.args.len() => (f1, f2),
                    _ => continue,
                };
                let outer = match prop(&props, a, b) {
                    Some(l) => l,
                    None => continue,
                };
                let mut member_lits = Vec::new();
                let mut known = true;
                for (x, y) in f1.args.iter().zip(f2.args.iter()) {
                    match prop(&props, y, x) {
                        Some(l) => member_lits.push(l),
                        None if x == y => {}
                        None => known = false,
                    }
                }
                match prop(&props, &f1.ret, &f2.ret) {
                    Some(l) => member_lits.push(l),
                    None if f1.ret == f2.ret => {}
                    None => known = false,
                }
                if known {
                    engine.equals_conjunction(outer, &member_lits);
                }
            }
        }

        // Instance-structural: nominal MRO subsequence (computed directly,
        // it never depends on a variable) conjoined with member-wise
        // subtype propositions over the shared override keys.
        for a in &types {
            for b in &types {
                let (i1, i2) = match (a, b) {
                    (Type::Instance(i1), Type::Instance(i2)) => (i1, i2),
                    _ => continue,
                };
                let outer = match prop(&props, a, b) {
                    Some(l) => l,
                    None => continue,
                };
                let nominal = {
                    let sub_mro = i1.mro.classes_or_panic();
                    let sup_mro = i2.mro.classes_or_panic();
                    pytype_lattice::mro::is_subsequence(&sup_mro, &sub_mro)
                };
                if !nominal {
                    engine.assign(outer, false);
                    continue;
                }
                let keys: Vec<&String> = i1.overrides.keys().filter(|k| i2.overrides.contains_key(*k)).collect();
                let mut member_lits = Vec::new();
                for k in keys {
                    let lt = &i1.overrides[k];
                    let rt = &i2.overrides[k];
                    if let Some(l) = prop(&props, lt, rt) {
                        member_lits.push(l);
                    }
                }
                engine.equals_conjunction(outer, &member_lits);
            }
        }

        // Union: `union <: y` iff every member is `<: y`; `x <: union` iff
        // `x` is `<:` some member.
        for a in &types {
            for b in &types {
                if let Type::Union(u) = a {
                    if let Some(outer) = prop(&props, a, b) {
                        let mut member_lits = Vec::new();
                        for m in &u.members {
                            if let Some(l) = prop(&props, m, b) {
                                member_lits.push(l);
                            }
                        }
                        engine.equals_conjunction(outer, &member_lits);
                    }
                }
                if let Type::Union(u) = b {
                    if let Some(outer) = prop(&props, a, b) {
                        let mut member_lits = Vec::new();
                        for m in &u.members {
                            if let Some(l) = prop(&props, a, m) {
                                member_lits.push(l);
                            }
                        }
                        engine.equals_disjunction(outer, &member_lits);
                    }
                }
            }
        }

        // Transitivity, optional (expensive, O(n^3) over the universe).
        if self.config.use_transitivity_constraints {
            for a in &types {
                for b in &types {
                    for c in &types {
                        if a == b || b == c || a == c {
                            continue;
                        }
                        if let (Some(ab), Some(bc), Some(ac)) =
                            (prop(&props, a, b), prop(&props, b, c), prop(&props, a, c))
                        {
                            let conj = engine.fresh_var().positive();
                            engine.equals_conjunction(conj, &[ab, bc]);
                            engine.implies(conj, ac);
                        }
                    }
                }
            }
        }

        // Active constraints are required to hold in this round's model.
        for c in store.active() {
            let (l, r) = (c.left.clone(), c.right.clone());
            match c.tag {
                ConstraintTag::Subtype => {
                    if let Some(lit) = prop(&props, &l, &r) {
                        engine.assign(lit, true);
                    }
                }
                ConstraintTag::Equal => {
                    if let Some(lit) = prop(&props, &l, &r) {
                        engine.assign(lit, true);
                    }
                    if let Some(lit) = prop(&props, &r, &l) {
                        engine.assign(lit, true);
                    }
                }
            }
        }

        // Objective: prefer the tightest feasible solution by asking the
        // solver to try `false` for every proposition not already forced.
        if self.config.use_concrete_solution_constraints {
            for lit in props.values() {
                engine.prefer(!*lit);
            }
        }

        let sat = engine.solve().map_err(SolverError::SatFailure)?;
        if !sat {
            return Err(SolverError::Unsatisfiable);
        }

        let mut results = Vec::new();
        for ((l, r), lit) in &props {
            if engine.value(lit.var()) == Some(true) {
                results.push((l.clone(), r.clone()));
            }
        }
        Ok(results)
    }

    pub fn solve(&self, store: &mut ConstraintStore) -> Result<BTreeMap<Variable, (Type, Type)>, SolverError> {
        let universe = structural_closure(seeds_from_store(&*store), &mut NoopProcessor);
        let results = self.solve_once(store, &universe)?;
        decode_bounds(&results, store)
    }

    /// Runs `config.iterations` rounds (two by default), re-seeding the
    /// structural closure between rounds with the lower/upper bounds the
    /// previous round discovered for each store variable — a widening
    /// step that lets a variable's first-round bounds pull in additional
    /// structural neighbors for the next round. The final round's true
    /// propositions are decoded into per-variable bounds before returning.
    pub fn solve_iterate(&self, store: &mut ConstraintStore) -> Result<BTreeMap<Variable, (Type, Type)>, SolverError> {
        let mut universe = structural_closure(seeds_from_store(&*store), &mut NoopProcessor);
        let mut results = self.solve_once(store, &universe)?;

        for _ in 1..self.config.iterations {
            let mut extra = Vec::new();
            for v in store.variables() {
                let vt = Type::Variable(*v);
                for (l, r) in &results {
                    if r == &vt {
                        extra.push(l.clone());
                    }
                    if l == &vt {
                        extra.push(r.clone());
                    }
                }
            }
            if extra.is_empty() {
                break;
            }
            let mut widen = WideningProcessor { extra };
            universe = structural_closure(universe.into_iter().chain(seeds_from_store(&*store)), &mut widen);
            results = self.solve_once(store, &universe)?;
        }
        decode_bounds(&results, store)
    }
}

/// Folds the true `(sub, sup)` propositions a solve round produced into a
/// per-variable `(lower, upper)` bound map: a proposition `C <: V` widens
/// V's lower bound by `join`, and a proposition `V <: C` narrows its upper
/// bound by `meet`, whenever the other side of the proposition does not
/// itself contain a variable. Mirrors `sat_encoder.py`'s `Solve`, which
/// folds `Inequality` propositions into exactly this shape.
fn decode_bounds(props: &[(Type, Type)], ctx: &mut dyn TypeContext) -> Result<BTreeMap<Variable, (Type, Type)>, SolverError> {
    let mut bounds: BTreeMap<Variable, (Type, Type)> = BTreeMap::new();
    let to_solver_error = |e: pytype_diag::LatticeError| SolverError::Store(StoreError::from(e));

    for (l, r) in props {
        if let Type::Variable(v) = l {
            let (lower, upper) = bounds.entry(*v).or_insert_with(|| (Type::Bottom, Type::Top)).clone();
            if !r.contains_variable() {
                let upper = upper.meet(r, ctx).map_err(to_solver_error)?;
                bounds.insert(*v, (lower, upper));
            }
        }
        if let Type::Variable(v) = r {
            let (lower, upper) = bounds.entry(*v).or_insert_with(|| (Type::Bottom, Type::Top)).clone();
            if !l.contains_variable() {
                let lower = lower.join(l, ctx).map_err(to_solver_error)?;
                bounds.insert(*v, (lower, upper));
            }
        }
    }
    Ok(bounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pytype_lattice::{Class, Mro};
    use std::collections::BTreeMap as Map;

    #[test]
    fn known_relation_is_reflected_in_solution() {
        let mut store = ConstraintStore::new();
        let object = Class::new("object", Map::new(), Map::new());
        let a = Type::instance(Mro::resolved(vec![Class::new("A", Map::new(), Map::new()), object.clone()]), Map::new());
        store.add_subtype(&a, &Type::Top);

        let enc = SatEncoder::new(SatConfig::default());
        let universe = structural_closure(seeds_from_store(&store), &mut NoopProcessor);
        let result = enc.solve_once(&mut store, &universe).unwrap();
        assert!(result.iter().any(|(l, r)| *l == a && *r == Type::Top));
    }

    #[test]
    fn decode_narrows_variable_bounds_from_true_propositions() {
        let object = Class::new("object", Map::new(), Map::new());
        let a = Type::instance(Mro::resolved(vec![Class::new("A", Map::new(), Map::new()), object]), Map::new());
        let mut store = ConstraintStore::new();
        let v = store.fresh_variable();
        store.add_subtype(&a, &Type::Variable(v));
        store.add_subtype(&Type::Variable(v), &Type::Top);

        let enc = SatEncoder::new(SatConfig::default());
        let bounds = enc.solve(&mut store).unwrap();
        let (lower, upper) = bounds.get(&v).expect("variable should have decoded bounds");
        assert_eq!(lower, &a);
        assert_eq!(upper, &Type::Top);
    }
}
