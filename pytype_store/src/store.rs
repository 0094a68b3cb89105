//! The constraint store (component D): a mutable multiset of subtype and
//! equality constraints plus the eleven simplification rewrites, run to a
//! fixed point by `simplify`. Grounded method-for-method on
//! `original_source/byterun/constraint/constraint_store.py`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use pytype_diag::StoreError;
use pytype_lattice::{Type, TypeContext, Variable};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConstraintTag {
    Subtype,
    Equal,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Constraint {
    pub left: Type,
    pub right: Type,
    pub tag: ConstraintTag,
}

impl Constraint {
    pub fn subtype(left: Type, right: Type) -> Constraint {
        Constraint { left, right, tag: ConstraintTag::Subtype }
    }

    /// Equality is unordered: `a = b` and `b = a` are the same fact, so the
    /// sides are canonicalized by `Type`'s derived `Ord` at construction —
    /// this is what lets the store dedup `add_equal(a, b)` against an
    /// earlier `add_equal(b, a)` without a separate symmetric lookup.
    pub fn equal(a: Type, b: Type) -> Constraint {
        if a <= b {
            Constraint { left: a, right: b, tag: ConstraintTag::Equal }
        } else {
            Constraint { left: b, right: a, tag: ConstraintTag::Equal }
        }
    }

    fn map_sides(&self, f: impl Fn(&Type) -> Type) -> Constraint {
        Constraint { left: f(&self.left), right: f(&self.right), tag: self.tag }
    }
}

fn type_mentions(t: &Type, v: Variable) -> bool {
    match t {
        Type::Variable(w) => *w == v,
        Type::Function(fun) => fun.args.iter().any(|a| type_mentions(a, v)) || type_mentions(&fun.ret, v),
        Type::Instance(i) => i.overrides.values().any(|m| type_mentions(m, v)),
        Type::Union(u) => u.members.iter().any(|m| type_mentions(m, v)),
        Type::Constant(_) | Type::Top | Type::Bottom | Type::Dynamic => false,
    }
}

/// A point-in-time copy of everything `simplify`/an encoder might mutate,
/// used to implement an "operate on snapshots then swap" recovery policy:
/// an encoder that aborts midway through rewriting its own working copy
/// never leaves the real store in a half-updated state.
#[derive(Clone)]
pub struct StoreSnapshot {
    active: BTreeSet<Constraint>,
    completed: BTreeSet<Constraint>,
    targets: BTreeSet<Type>,
    substitution: BTreeMap<Variable, Type>,
}

/// Mutable multiset of subtype/equality constraints, the variable and
/// target registries, and the composed substitution accumulated by
/// `eliminate_equality_constraints`, kept consistent with every other
/// live binding as new equalities are discovered. This is the sole
/// implementer of `TypeContext`: every
/// lattice operation that can allocate a fresh variable or needs to know
/// whether one type is (possibly unknowably) a subtype of another goes
/// through a `&mut ConstraintStore`.
pub struct ConstraintStore {
    next_variable_id: u32,
    active: BTreeSet<Constraint>,
    completed: BTreeSet<Constraint>,
    variables: BTreeSet<Variable>,
    targets: BTreeSet<Type>,
    variable_attributes: BTreeMap<(Variable, String), Variable>,
    substitution: BTreeMap<Variable, Type>,
}

impl Default for ConstraintStore {
    fn default() -> ConstraintStore {
        ConstraintStore::new()
    }
}

impl ConstraintStore {
    pub fn new() -> ConstraintStore {
        ConstraintStore {
            next_variable_id: 0,
            active: BTreeSet::new(),
            completed: BTreeSet::new(),
            variables: BTreeSet::new(),
            targets: BTreeSet::new(),
            variable_attributes: BTreeMap::new(),
            substitution: BTreeMap::new(),
        }
    }

    pub fn active(&self) -> &BTreeSet<Constraint> {
        &self.active
    }

    pub fn completed(&self) -> &BTreeSet<Constraint> {
        &self.completed
    }

    pub fn targets(&self) -> &BTreeSet<Type> {
        &self.targets
    }

    pub fn variables(&self) -> &BTreeSet<Variable> {
        &self.variables
    }

    pub fn add_subtype(&mut self, a: &Type, b: &Type) {
        if a == b {
            return;
        }
        let c = Constraint::subtype(a.clone(), b.clone());
        if self.active.insert(c) {
            log::debug!("add_subtype: {:?} <: {:?}", a, b);
        }
    }

    pub fn add_equal(&mut self, a: &Type, b: &Type) {
        if a == b {
            return;
        }
        let c = Constraint::equal(a.clone(), b.clone());
        if self.active.insert(c) {
            log::debug!("add_equal: {:?} = {:?}", a, b);
        }
    }

    pub fn add_target(&mut self, t: &Type) {
        self.targets.insert(t.clone());
    }

    /// Every active constraint that mentions `v` anywhere, not just at the
    /// top level (unlike the top-level-only scans the simplification
    /// rewrites use internally).
    pub fn constraints_on_variable(&self, v: Variable) -> Vec<&Constraint> {
        self.active
            .iter()
            .filter(|c| type_mentions(&c.left, v) || type_mentions(&c.right, v))
            .collect()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            active: self.active.clone(),
            completed: self.completed.clone(),
            targets: self.targets.clone(),
            substitution: self.substitution.clone(),
        }
    }

    pub fn restore(&mut self, snap: StoreSnapshot) {
        self.active = snap.active;
        self.completed = snap.completed;
        self.targets = snap.targets;
        self.substitution = snap.substitution;
    }

    fn apply_substitution_to_all(&mut self, v: Variable, t: &Type) {
        let mut map = HashMap::new();
        map.insert(v, t.clone());
        let old_active = std::mem::take(&mut self.active);
        for c in old_active {
            self.active.insert(c.map_sides(|ty| ty.substitute(&map)));
        }
        let old_completed = std::mem::take(&mut self.completed);
        for c in old_completed {
            self.completed.insert(c.map_sides(|ty| ty.substitute(&map)));
        }
        let old_targets = std::mem::take(&mut self.targets);
        for t2 in old_targets {
            self.targets.insert(t2.substitute(&map));
        }
    }

    /// Rewrite 1: replace every `Constant` reachable from any active
    /// constraint or target with its `value_type`.
    pub fn remove_constants(&mut self) -> bool {
        let mut changed = false;
        let old_active = std::mem::take(&mut self.active);
        for c in old_active {
            let new_c = c.map_sides(Type::remove_constants);
            changed |= new_c != c;
            self.active.insert(new_c);
        }
        let old_targets = std::mem::take(&mut self.targets);
        for t in old_targets {
            let new_t = t.remove_constants();
            changed |= new_t != t;
            self.targets.insert(new_t);
        }
        changed
    }

    /// Rewrite 2: a constraint whose two sides are now syntactically equal
    /// (most often the result of an earlier substitution) carries no
    /// information; drop it outright rather than filing it in `completed`.
    pub fn drop_reflexive(&mut self) -> bool {
        let before_active = self.active.len();
        self.active.retain(|c| c.left != c.right);
        let before_completed = self.completed.len();
        self.completed.retain(|c| c.left != c.right);
        before_active != self.active.len() || before_completed != self.completed.len()
    }

    /// Rewrite 3. Only equalities with a bare `Variable` on (at least) one
    /// side become substitutions — a structural equality between two
    /// composite, variable-free types carries no variable to eliminate and
    /// is left for `eliminate_known_relations`/`unify_subtype_constraint`
    /// to deal with. To keep the accumulated substitution consistent, the
    /// new binding is first pushed through the existing partial
    /// substitution, then composed into every existing codomain entry,
    /// before being applied store-wide.
    pub fn eliminate_equality_constraints(&mut self) -> bool {
        let mut changed = false;
        let equalities: Vec<Constraint> =
            self.active.iter().filter(|c| c.tag == ConstraintTag::Equal).cloned().collect();
        for c in equalities {
            let binding = match (&c.left, &c.right) {
                (Type::Variable(v), t) => Some((*v, t.clone())),
                (t, Type::Variable(v)) => Some((*v, t.clone())),
                _ => None,
            };
            if let Some((v, t)) = binding {
                let prior: HashMap<Variable, Type> =
                    self.substitution.iter().map(|(k, v)| (*k, v.clone())).collect();
                let t = t.substitute(&prior);
                let mut singleton = HashMap::new();
                singleton.insert(v, t.clone());
                for existing in self.substitution.values_mut() {
                    *existing = existing.substitute(&singleton);
                }
                self.substitution.insert(v, t.clone());
                self.apply_substitution_to_all(v, &t);
                changed = true;
            }
            self.active.remove(&c);
            self.completed.insert(c);
        }
        changed
    }

    /// Rewrite 4.
    pub fn eliminate_known_relations(&mut self) -> Result<bool, StoreError> {
        let mut changed = false;
        let candidates: Vec<Constraint> = self
            .active
            .iter()
            .filter(|c| c.tag == ConstraintTag::Subtype && !c.left.contains_variable() && !c.right.contains_variable())
            .cloned()
            .collect();
        for c in candidates {
            if c.left.is_subtype_closed(&c.right)? {
                self.active.remove(&c);
                self.completed.insert(c);
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Rewrite 5: combine every *concrete* (non-variable) upper bound a
    /// variable has into a single meet. Variable-typed upper bounds are
    /// left for `merge_super_bounds`.
    pub fn meet_super_bounds(&mut self) -> Result<bool, StoreError> {
        let mut changed = false;
        let vars: Vec<Variable> = self.variables.iter().cloned().collect();
        for v in vars {
            let vt = Type::Variable(v);
            let bounds: Vec<Type> = self
                .active
                .iter()
                .filter(|c| c.tag == ConstraintTag::Subtype && c.left == vt && !matches!(c.right, Type::Variable(_)))
                .map(|c| c.right.clone())
                .collect();
            if bounds.len() > 1 {
                for b in &bounds {
                    self.active.remove(&Constraint::subtype(vt.clone(), b.clone()));
                }
                let mut merged = bounds[0].clone();
                for b in &bounds[1..] {
                    merged = merged.meet(b, self)?;
                }
                self.add_subtype(&vt, &merged);
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Rewrite 6, dual to rewrite 5: combine concrete lower bounds by join.
    pub fn join_sub_bounds(&mut self) -> Result<bool, StoreError> {
        let mut changed = false;
        let vars: Vec<Variable> = self.variables.iter().cloned().collect();
        for v in vars {
            let vt = Type::Variable(v);
            let bounds: Vec<Type> = self
                .active
                .iter()
                .filter(|c| c.tag == ConstraintTag::Subtype && c.right == vt && !matches!(c.left, Type::Variable(_)))
                .map(|c| c.left.clone())
                .collect();
            if bounds.len() > 1 {
                for b in &bounds {
                    self.active.remove(&Constraint::subtype(b.clone(), vt.clone()));
                }
                let mut merged = bounds[0].clone();
                for b in &bounds[1..] {
                    merged = merged.join(b, self)?;
                }
                self.add_subtype(&merged, &vt);
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Rewrite 7: whenever a variable's upper bound is itself a (distinct)
    /// variable, force them equal instead of trying to meet them — this is
    /// what lets `eliminate_equality_constraints` collapse the redundant
    /// one away on a later pass.
    pub fn merge_super_bounds(&mut self) -> bool {
        let mut changed = false;
        let vars: Vec<Variable> = self.variables.iter().cloned().collect();
        for v in vars {
            let vt = Type::Variable(v);
            let var_bounds: Vec<(Constraint, Variable)> = self
                .active
                .iter()
                .filter(|c| c.tag == ConstraintTag::Subtype && c.left == vt)
                .filter_map(|c| match c.right {
                    Type::Variable(w) if w != v => Some((c.clone(), w)),
                    _ => None,
                })
                .collect();
            for (c, w) in var_bounds {
                self.add_equal(&vt, &Type::Variable(w));
                self.active.remove(&c);
                changed = true;
            }
        }
        changed
    }

    /// Rewrite 8: a variable with exactly one upper-bound constraint can be
    /// identified with that bound outright — a deliberate loss of
    /// precision (any subtype of the bound would also have worked) traded
    /// for progress, consistent with the rewrites being sound but
    /// incomplete.
    pub fn eliminate_trivially_super_bounded_variables(&mut self) -> bool {
        let mut changed = false;
        let vars: Vec<Variable> = self.variables.iter().cloned().collect();
        for v in vars {
            let vt = Type::Variable(v);
            let uppers: Vec<Constraint> = self
                .active
                .iter()
                .filter(|c| c.tag == ConstraintTag::Subtype && c.left == vt)
                .cloned()
                .collect();
            if uppers.len() == 1 {
                let bound = uppers[0].right.clone();
                self.active.remove(&uppers[0]);
                self.substitution.insert(v, bound.clone());
                self.apply_substitution_to_all(v, &bound);
                changed = true;
            }
        }
        changed
    }

    /// Rewrite 9: a variable mentioned by exactly one active constraint
    /// overall is unconstrained in any way that matters — discharge that
    /// lone constraint without bothering to resolve the variable.
    pub fn eliminate_trivially_constrained_unused_variables(&mut self) -> bool {
        let mut changed = false;
        let vars: Vec<Variable> = self.variables.iter().cloned().collect();
        for v in vars {
            let vt = Type::Variable(v);
            let mentions: Vec<Constraint> =
                self.active.iter().filter(|c| c.left == vt || c.right == vt).cloned().collect();
            if mentions.len() == 1 {
                self.active.remove(&mentions[0]);
                self.completed.insert(mentions[0].clone());
                changed = true;
            }
        }
        changed
    }

    /// Rewrite 10: a variable that appears only as a bare top-level side
    /// (never nested inside a composite type) and that is related to
    /// concrete-or-other-variable bounds on both sides can be bridged
    /// directly, skipping over it.
    pub fn eliminate_variables_by_transitivity(&mut self) -> bool {
        let mut changed = false;
        let vars: Vec<Variable> = self.variables.iter().cloned().collect();
        for v in vars {
            let vt = Type::Variable(v);
            let appears_nested = self
                .active
                .iter()
                .any(|c| (c.left != vt && type_mentions(&c.left, v)) || (c.right != vt && type_mentions(&c.right, v)));
            if appears_nested {
                continue;
            }
            let lefts: Vec<Type> = self
                .active
                .iter()
                .filter(|c| c.tag == ConstraintTag::Subtype && c.right == vt)
                .map(|c| c.left.clone())
                .collect();
            let rights: Vec<Type> = self
                .active
                .iter()
                .filter(|c| c.tag == ConstraintTag::Subtype && c.left == vt)
                .map(|c| c.right.clone())
                .collect();
            if lefts.is_empty() || rights.is_empty() {
                continue;
            }
            for l in &lefts {
                for r in &rights {
                    self.add_subtype(l, r);
                }
            }
            for l in &lefts {
                self.active.remove(&Constraint::subtype(l.clone(), vt.clone()));
            }
            for r in &rights {
                self.active.remove(&Constraint::subtype(vt.clone(), r.clone()));
            }
            changed = true;
        }
        changed
    }

    /// Rewrite 11: a subtype constraint between two same-shaped composites
    /// decomposes into member-wise constraints — the place where the
    /// store, rather than the pure lattice, drives structural recursion.
    pub fn unify_subtype_constraint(&mut self) -> bool {
        let mut changed = false;
        let candidates: Vec<Constraint> =
            self.active.iter().filter(|c| c.tag == ConstraintTag::Subtype).cloned().collect();
        for c in candidates {
            match (&c.left, &c.right) {
                (Type::Function(f1), Type::Function(f2)) if f1.args.len() == f2.args.len() => {
                    self.active.remove(&c);
                    for (a, b) in f1.args.iter().zip(f2.args.iter()) {
                        self.add_subtype(b, a);
                    }
                    self.add_subtype(&f1.ret, &f2.ret);
                    changed = true;
                }
                (Type::Instance(i1), Type::Instance(i2)) => {
                    let subsequence = {
                        let sub_mro = i1.mro.classes_or_panic();
                        let sup_mro = i2.mro.classes_or_panic();
                        pytype_lattice::mro::is_subsequence(&sup_mro, &sub_mro)
                    };
                    if subsequence {
                        self.active.remove(&c);
                        let keys: Vec<String> =
                            i1.overrides.keys().filter(|k| i2.overrides.contains_key(*k)).cloned().collect();
                        for k in keys {
                            let lt = i1.overrides[&k].clone();
                            let rt = i2.overrides[&k].clone();
                            self.add_subtype(&lt, &rt);
                        }
                        changed = true;
                    }
                }
                _ => {}
            }
        }
        changed
    }

    /// Runs `remove_constants`, `drop_reflexive`, then loops the remaining
    /// six rewrites to a fixed point, in a fixed order matched to the
    /// original implementation's rewrite loop. `merge_super_bounds` and
    /// `eliminate_variables_by_transitivity` are deliberately not part of
    /// this loop — the original keeps them defined but unused pending
    /// further work, and this crate preserves that split rather than
    /// folding them in.
    pub fn simplify(&mut self) -> Result<(), StoreError> {
        self.remove_constants();
        self.drop_reflexive();
        loop {
            let mut changed = self.eliminate_equality_constraints();
            changed |= self.eliminate_known_relations()?;
            changed |= self.meet_super_bounds()?;
            changed |= self.join_sub_bounds()?;
            changed |= self.eliminate_trivially_super_bounded_variables();
            changed |= self.eliminate_trivially_constrained_unused_variables();
            changed |= self.unify_subtype_constraint();
            if !changed {
                break;
            }
        }
        log::info!(
            "simplify: {} active, {} completed constraints remain",
            self.active.len(),
            self.completed.len()
        );
        Ok(())
    }
}

impl TypeContext for ConstraintStore {
    fn fresh_variable(&mut self) -> Variable {
        let id = self.next_variable_id;
        self.next_variable_id += 1;
        let v = Variable(id);
        self.variables.insert(v);
        v
    }

    fn is_subtype(&self, a: &Type, b: &Type) -> Option<bool> {
        if !a.contains_variable() && !b.contains_variable() {
            return a.is_subtype_closed(b).ok();
        }
        if self.active.contains(&Constraint::subtype(a.clone(), b.clone())) {
            Some(true)
        } else {
            None
        }
    }

    fn fresh_variable_supertype(&mut self, a: &Type, b: &Type) -> Type {
        if self.is_subtype(b, a) == Some(true) {
            return a.clone();
        }
        if self.is_subtype(a, b) == Some(true) {
            return b.clone();
        }
        let v = self.fresh_variable();
        let vt = Type::Variable(v);
        self.add_subtype(a, &vt);
        self.add_subtype(b, &vt);
        vt
    }

    fn fresh_variable_subtype(&mut self, a: &Type, b: Option<&Type>) -> Type {
        let b = b.cloned().unwrap_or(Type::Top);
        if self.is_subtype(a, &b) == Some(true) {
            return a.clone();
        }
        if self.is_subtype(&b, a) == Some(true) {
            return b;
        }
        let v = self.fresh_variable();
        let vt = Type::Variable(v);
        self.add_subtype(&vt, a);
        self.add_subtype(&vt, &b);
        vt
    }

    fn attribute_variable(&mut self, var: Variable, name: &str) -> Variable {
        let key = (var, name.to_string());
        if let Some(&cached) = self.variable_attributes.get(&key) {
            return cached;
        }
        let fresh = self.fresh_variable();
        self.variable_attributes.insert(key, fresh);
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use pytype_lattice::{Class, Mro};

    fn class(name: &str) -> Class {
        Class::new(name, BTreeMap::new(), BTreeMap::new())
    }

    fn instance(classes: Vec<Class>) -> Type {
        Type::instance(Mro::resolved(classes), BTreeMap::new())
    }

    #[test]
    fn add_subtype_is_idempotent() {
        let mut store = ConstraintStore::new();
        let a = instance(vec![class("A"), class("object")]);
        let b = instance(vec![class("B"), class("object")]);
        store.add_subtype(&a, &b);
        store.add_subtype(&a, &b);
        assert_eq!(store.active().len(), 1);
    }

    #[test]
    fn reflexive_constraint_is_never_added() {
        let mut store = ConstraintStore::new();
        let a = instance(vec![class("A"), class("object")]);
        store.add_subtype(&a, &a);
        assert!(store.active().is_empty());
    }

    #[test]
    fn eliminate_known_relations_retires_holding_constraints() {
        let mut store = ConstraintStore::new();
        let object = class("object");
        let a = instance(vec![class("A"), object.clone()]);
        let b = instance(vec![class("B"), object.clone()]);
        let c = instance(vec![class("C"), class("B"), object.clone()]);
        let c_from_b = instance(vec![class("C"), class("B"), object]);
        store.add_subtype(&c, &b);
        store.add_subtype(&a, &c_from_b);
        store.eliminate_known_relations().unwrap();
        assert!(store.completed().iter().any(|con| con.left == c && con.right == b));
        assert!(store.active().iter().any(|con| con.left == a));
    }

    #[test]
    fn eliminate_trivially_super_bounded_variable_substitutes() {
        let mut store = ConstraintStore::new();
        let v = store.fresh_variable();
        let object = class("object");
        let bound = instance(vec![class("A"), object]);
        store.add_subtype(&Type::Variable(v), &bound);
        let lower = Type::Variable(store.fresh_variable());
        store.add_subtype(&lower, &Type::Variable(v));
        store.eliminate_trivially_super_bounded_variables();
        assert!(store.active().iter().any(|c| c.left == lower && c.right == bound));
    }

    #[test]
    fn transitivity_bridges_and_retires() {
        let mut store = ConstraintStore::new();
        let v = store.fresh_variable();
        let object = class("object");
        let l = instance(vec![class("L"), object.clone()]);
        let r = instance(vec![class("R"), object]);
        store.add_subtype(&l, &Type::Variable(v));
        store.add_subtype(&Type::Variable(v), &r);
        store.eliminate_variables_by_transitivity();
        assert!(store.active().iter().any(|c| c.left == l && c.right == r));
        assert!(!store.active().iter().any(|c| c.left == Type::Variable(v) || c.right == Type::Variable(v)));
    }

    #[test]
    fn simplify_reaches_fixed_point_without_panicking() {
        let mut store = ConstraintStore::new();
        let object = class("object");
        let a = instance(vec![class("A"), object.clone()]);
        let b = instance(vec![class("B"), object]);
        let v = store.fresh_variable();
        store.add_subtype(&a, &Type::Variable(v));
        store.add_subtype(&Type::Variable(v), &b);
        store.simplify().unwrap();
    }
}
