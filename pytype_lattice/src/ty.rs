//! The eight-variant type lattice, grounded on
//! `original_source`'s `types.py` and shaped like `kailua_types::ty`'s split
//! between the closed type algebra and the `TypeContext` trait an
//! environment implements.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use pytype_diag::LatticeError;

use crate::class::Class;
use crate::mro::{self, Mro};

/// A fresh, globally unique type variable. Mirrors `kailua_types::ty::TVar`:
/// a bare `Copy` identity with no payload of its own. Anything mutable about
/// a variable (its bounds, its attribute cache) lives on the constraint
/// store that allocated it, not on this handle — see design note "Variable
/// allocation as side effect" in SPEC_FULL.md.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variable(pub u32);

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// A literal value a `Constant` type can range over. `Float` is stored as
/// its bit pattern so the type can implement `Eq`/`Hash`/`Ord` like every
/// other closed variant (`f64` alone cannot).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConstValue {
    NoneVal,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(Rc<str>),
}

impl ConstValue {
    pub fn float(v: f64) -> ConstValue {
        ConstValue::Float(v.to_bits())
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConstValue::NoneVal => write!(f, "None"),
            ConstValue::Bool(b) => write!(f, "{}", b),
            ConstValue::Int(i) => write!(f, "{}", i),
            ConstValue::Float(bits) => write!(f, "{}", f64::from_bits(*bits)),
            ConstValue::Str(s) => write!(f, "{:?}", s),
        }
    }
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionType {
    pub args: Vec<Type>,
    pub ret: Type,
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceType {
    pub mro: Mro,
    pub overrides: BTreeMap<String, Type>,
}

impl InstanceType {
    /// The instance's full effective structure — every class/instance
    /// member reachable through its (resolved) MRO, with `overrides`
    /// layered on top. Exposed so the Datalog/SAT encoders' structural
    /// closure, which descends into every instance's structure, does not
    /// need its own copy of this fold.
    pub fn effective_structure(&self) -> BTreeMap<String, Type> {
        effective_structure(&self.mro.classes_or_panic(), &self.overrides)
    }
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnionType {
    pub members: Vec<Type>,
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstantType {
    pub values: Vec<ConstValue>,
    pub value_type: Type,
}

impl ConstantType {
    /// Builds a constant from a deduplicated, sorted set of values and an
    /// explicit `value_type`. Unlike `original_source`'s `ConstantType`,
    /// which recomputes `value_type` by looking literal values up in the
    /// (out of scope) interpreter's `type_map`, the external collaborator
    /// that classifies a literal's natural type is expected to supply
    /// `value_type` directly — this crate has no VM to ask.
    pub fn new(mut values: Vec<ConstValue>, value_type: Type) -> ConstantType {
        values.sort();
        values.dedup();
        ConstantType { values, value_type }
    }
}

/// The closed sum of type variants. Composite variants are
/// `Rc`-wrapped so `Type` stays cheap to `Clone` — every lattice operation
/// below builds new `Type`s rather than mutating in place (invariant 7).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
    Top,
    Bottom,
    Dynamic,
    Variable(Variable),
    Constant(Rc<ConstantType>),
    Function(Rc<FunctionType>),
    Instance(Rc<InstanceType>),
    Union(Rc<UnionType>),
}

impl Type {
    pub fn function(args: Vec<Type>, ret: Type) -> Type {
        Type::Function(Rc::new(FunctionType { args, ret }))
    }

    pub fn instance(mro: Mro, overrides: BTreeMap<String, Type>) -> Type {
        Type::Instance(Rc::new(InstanceType { mro, overrides }))
    }

    pub fn constant(values: Vec<ConstValue>, value_type: Type) -> Type {
        Type::Constant(Rc::new(ConstantType::new(values, value_type)))
    }

    /// Flattens, deduplicates, and collapses a set of union members per
    /// invariant 1: `Union({T}) ≡ T`, `Union({}) ≡ Bottom`, no nested
    /// `Union` members survive.
    pub fn union(members: Vec<Type>) -> Type {
        let mut flat = Vec::new();
        fn flatten(t: Type, out: &mut Vec<Type>) {
            match t {
                Type::Union(u) => {
                    for m in Rc::try_unwrap(u).map(|u| u.members).unwrap_or_else(|u| u.members.clone()) {
                        flatten(m, out);
                    }
                }
                other => out.push(other),
            }
        }
        for m in members {
            flatten(m, &mut flat);
        }
        flat.sort();
        flat.dedup();
        match flat.len() {
            0 => Type::Bottom,
            1 => flat.into_iter().next().unwrap(),
            _ => Type::Union(Rc::new(UnionType { members: flat })),
        }
    }

    pub fn is_top(&self) -> bool {
        matches!(self, Type::Top)
    }

    pub fn is_bottom(&self) -> bool {
        matches!(self, Type::Bottom)
    }

    /// `ContainsVariable`, implemented with a native `match` rather than a
    /// visitor object. A `Constant`'s
    /// `value_type` is deliberately not inspected — `original_source`'s
    /// `ContainsVisitor` does not recurse past a constant either, relying
    /// on `remove_constants` having already normalized constants away
    /// before this matters.
    pub fn contains_variable(&self) -> bool {
        match self {
            Type::Variable(_) => true,
            Type::Function(f) => f.args.iter().any(Type::contains_variable) || f.ret.contains_variable(),
            Type::Instance(i) => i.overrides.values().any(Type::contains_variable),
            Type::Union(u) => u.members.iter().any(Type::contains_variable),
            Type::Constant(_) | Type::Top | Type::Bottom | Type::Dynamic => false,
        }
    }

    /// Replaces every `Constant` reachable from `self` (at any depth) with
    /// its `value_type`; the top-level rewrite used by
    /// `ConstraintStore::remove_constants`.
    pub fn remove_constants(&self) -> Type {
        match self {
            Type::Constant(c) => c.value_type.clone(),
            Type::Function(f) => Type::function(
                f.args.iter().map(Type::remove_constants).collect(),
                f.ret.remove_constants(),
            ),
            Type::Instance(i) => Type::instance(
                i.mro.clone(),
                i.overrides.iter().map(|(k, v)| (k.clone(), v.remove_constants())).collect(),
            ),
            Type::Union(u) => Type::union(u.members.iter().map(Type::remove_constants).collect()),
            Type::Variable(_) | Type::Top | Type::Bottom | Type::Dynamic => self.clone(),
        }
    }

    /// Rewrites every `Variable` per `mapping`, leaving everything else
    /// (crucially, a `Constant`'s `value_type`, and an `Instance`'s `Mro`)
    /// untouched — matching `original_source`'s `SubstVisitor`, which
    /// overrides only `visit_variable` and leaves constants and MROs alone
    /// (recursing into an MRO would walk into the cyclic class/instance
    /// structure directly).
    pub fn substitute(&self, mapping: &HashMap<Variable, Type>) -> Type {
        match self {
            Type::Variable(v) => mapping.get(v).cloned().unwrap_or_else(|| self.clone()),
            Type::Function(f) => Type::function(
                f.args.iter().map(|a| a.substitute(mapping)).collect(),
                f.ret.substitute(mapping),
            ),
            Type::Instance(i) => Type::instance(
                i.mro.clone(),
                i.overrides.iter().map(|(k, v)| (k.clone(), v.substitute(mapping))).collect(),
            ),
            Type::Union(u) => Type::union(u.members.iter().map(|m| m.substitute(mapping)).collect()),
            Type::Constant(_) | Type::Top | Type::Bottom | Type::Dynamic => self.clone(),
        }
    }

    /// The pure subtype predicate, restricted to the variable-free
    /// fragment: calling this with a `Variable` anywhere it is not covered
    /// by one of the definitive cases (reflexivity, `Top`/`Bottom`/
    /// `Dynamic`, `Union`, `Constant`) is a bug in the caller —
    /// `ConstraintStore::is_subtype` (the actual three-valued, store-aware
    /// predicate) is expected to have screened those cases out first by checking
    /// `contains_variable` before ever calling down into this function,
    /// exactly as `original_source`'s `ConstraintStore.issubtypeof` does.
    pub fn is_subtype_closed(&self, other: &Type) -> Result<bool, LatticeError> {
        if self == other {
            return Ok(true);
        }
        if let Type::Top = other {
            return Ok(true);
        }
        if let Type::Bottom = self {
            return Ok(true);
        }
        if matches!(self, Type::Dynamic) || matches!(other, Type::Dynamic) {
            return Ok(false);
        }
        if let Type::Bottom = other {
            return Ok(false);
        }
        if let Type::Top = self {
            return Ok(false);
        }

        match (self, other) {
            (Type::Constant(c1), Type::Constant(c2)) => {
                let subset = c1.values.iter().all(|v| c2.values.contains(v));
                Ok(subset && c1.value_type.is_subtype_closed(&c2.value_type)?)
            }
            (Type::Constant(c1), _) => c1.value_type.is_subtype_closed(other),
            (_, Type::Constant(c2)) => self.is_subtype_closed(&c2.value_type),
            _ => self.is_subtype_closed_nonconstant(other),
        }
    }

    fn is_subtype_closed_nonconstant(&self, other: &Type) -> Result<bool, LatticeError> {
        if let Type::Union(u) = self {
            return u.members.iter().try_fold(true, |acc, m| Ok(acc && m.is_subtype_closed(other)?));
        }
        if let Type::Union(u) = other {
            return u.members.iter().try_fold(false, |acc, m| Ok(acc || self.is_subtype_closed(m)?));
        }

        match (self, other) {
            (Type::Function(f1), Type::Function(f2)) => {
                if f1.args.len() != f2.args.len() {
                    return Ok(false);
                }
                for (a, b) in f1.args.iter().zip(f2.args.iter()) {
                    // contravariant: the supertype's parameter must accept
                    // everything the subtype's parameter does.
                    if !b.is_subtype_closed(a)? {
                        return Ok(false);
                    }
                }
                f1.ret.is_subtype_closed(&f2.ret)
            }
            (Type::Function(_), Type::Instance(_)) | (Type::Instance(_), Type::Function(_)) => Ok(false),
            (Type::Instance(i1), Type::Instance(i2)) => {
                let sub_mro = i1.mro.classes_or_panic();
                let sup_mro = i2.mro.classes_or_panic();
                if !mro::is_subsequence(&sup_mro, &sub_mro) {
                    return Ok(false);
                }
                let sup_structure = effective_structure(&sup_mro, &i2.overrides);
                dict_is_subtype(&i1.overrides, &sup_structure)
            }
            _ => Err(LatticeError::TypeKindMismatch {
                operation: "is_subtype_closed",
                left: format!("{:?}", self),
                right: format!("{:?}", other),
            }),
        }
    }

    /// Join (least upper bound), closed-form; any branch
    /// that needs to relate a free `Variable` to something else defers to
    /// `ctx.fresh_variable_supertype`, which may allocate — see design note
    /// "Variable allocation as side effect".
    pub fn join(&self, other: &Type, ctx: &mut dyn TypeContext) -> Result<Type, LatticeError> {
        if self == other {
            return Ok(self.clone());
        }
        if let Type::Top = self { return Ok(Type::Top); }
        if let Type::Top = other { return Ok(Type::Top); }
        if let Type::Bottom = self { return Ok(other.clone()); }
        if let Type::Bottom = other { return Ok(self.clone()); }
        if matches!(self, Type::Dynamic) || matches!(other, Type::Dynamic) {
            return Ok(Type::Dynamic);
        }

        match (self, other) {
            (Type::Constant(c1), Type::Constant(c2)) => {
                let mut values = c1.values.clone();
                values.extend(c2.values.iter().cloned());
                let value_type = c1.value_type.join(&c2.value_type, ctx)?;
                Ok(Type::constant(values, value_type))
            }
            (Type::Constant(c1), _) => c1.value_type.join(other, ctx),
            (_, Type::Constant(c2)) => self.join(&c2.value_type, ctx),
            (Type::Variable(_), _) | (_, Type::Variable(_)) => Ok(ctx.fresh_variable_supertype(self, other)),
            (Type::Union(_), _) | (_, Type::Union(_)) => union_join(self, other, ctx),
            (Type::Function(f1), Type::Function(f2)) if f1.args.len() == f2.args.len() => {
                let mut args = Vec::with_capacity(f1.args.len());
                for (a, b) in f1.args.iter().zip(f2.args.iter()) {
                    args.push(a.meet(b, ctx)?);
                }
                let ret = f1.ret.join(&f2.ret, ctx)?;
                Ok(Type::function(args, ret))
            }
            // Unequal arity is a known precision loss, left unchanged
            // rather than fixed (see DESIGN.md).
            (Type::Function(_), Type::Function(_)) => Ok(Type::Top),
            (Type::Function(_), Type::Instance(_)) | (Type::Instance(_), Type::Function(_)) => Ok(Type::Top),
            (Type::Instance(i1), Type::Instance(i2)) => instance_join(i1, i2, ctx),
            _ => Err(LatticeError::TypeKindMismatch {
                operation: "join",
                left: format!("{:?}", self),
                right: format!("{:?}", other),
            }),
        }
    }

    /// Meet (greatest lower bound); dual to `join`.
    pub fn meet(&self, other: &Type, ctx: &mut dyn TypeContext) -> Result<Type, LatticeError> {
        if self == other {
            return Ok(self.clone());
        }
        if let Type::Bottom = self { return Ok(Type::Bottom); }
        if let Type::Bottom = other { return Ok(Type::Bottom); }
        if let Type::Top = self { return Ok(other.clone()); }
        if let Type::Top = other { return Ok(self.clone()); }
        if matches!(self, Type::Dynamic) || matches!(other, Type::Dynamic) {
            return Ok(Type::Dynamic);
        }

        match (self, other) {
            (Type::Constant(c1), Type::Constant(c2)) => {
                let shared: Vec<ConstValue> = c1.values.iter().filter(|v| c2.values.contains(v)).cloned().collect();
                if !shared.is_empty() {
                    let value_type = c1.value_type.meet(&c2.value_type, ctx)?;
                    Ok(Type::constant(shared, value_type))
                } else {
                    c1.value_type.meet(&c2.value_type, ctx)
                }
            }
            (Type::Constant(c1), _) => c1.value_type.meet(other, ctx),
            (_, Type::Constant(c2)) => self.meet(&c2.value_type, ctx),
            (Type::Variable(_), _) | (_, Type::Variable(_)) => Ok(ctx.fresh_variable_subtype(self, Some(other))),
            (Type::Union(_), _) | (_, Type::Union(_)) => union_meet(self, other, ctx),
            (Type::Function(f1), Type::Function(f2)) if f1.args.len() == f2.args.len() => {
                let mut args = Vec::with_capacity(f1.args.len());
                for (a, b) in f1.args.iter().zip(f2.args.iter()) {
                    args.push(a.join(b, ctx)?);
                }
                let ret = f1.ret.meet(&f2.ret, ctx)?;
                Ok(Type::function(args, ret))
            }
            (Type::Function(_), Type::Function(_)) => Ok(Type::Bottom),
            (Type::Function(_), Type::Instance(_)) | (Type::Instance(_), Type::Function(_)) => Ok(Type::Bottom),
            (Type::Instance(i1), Type::Instance(i2)) => instance_meet(i1, i2, ctx),
            _ => Err(LatticeError::TypeKindMismatch {
                operation: "meet",
                left: format!("{:?}", self),
                right: format!("{:?}", other),
            }),
        }
    }

    /// Attribute lookup. `Instance` walks overrides then the
    /// MRO (binding away the first parameter of class-level methods);
    /// `Union` distributes; `Variable` consults (or creates) a per-name
    /// cached attribute variable on the context; everything else that has
    /// no sensible notion of an attribute is a caller bug, mirroring
    /// `original_source`'s default `Type.getattr` raising `AttributeError`.
    pub fn getattr(&self, attr: &str, ctx: &mut dyn TypeContext) -> Result<Type, LatticeError> {
        match self {
            Type::Bottom => Ok(Type::Bottom),
            Type::Dynamic => Ok(Type::Dynamic),
            Type::Constant(c) => c.value_type.getattr(attr, ctx),
            Type::Variable(v) => Ok(Type::Variable(ctx.attribute_variable(*v, attr))),
            Type::Union(u) => {
                let mut members = Vec::with_capacity(u.members.len());
                for m in &u.members {
                    members.push(m.getattr(attr, ctx)?);
                }
                Ok(Type::union(members))
            }
            Type::Instance(i) => instance_getattr(i, attr, ctx),
            Type::Top | Type::Function(_) => Err(LatticeError::TypeKindMismatch {
                operation: "getattr",
                left: format!("{:?}", self),
                right: attr.to_string(),
            }),
        }
    }
}

/// Every lattice operation that may need to allocate a fresh variable, or
/// that needs to consult the store's active-constraint set to resolve a
/// `Variable`-involving subtype query, goes through this trait —
/// `pytype_store::ConstraintStore` is the sole implementer. This is the
/// `kailua_types::ty::TypeContext` pattern: decouple the pure type algebra
/// from the mutable environment, and thread that environment explicitly
/// rather than reach for it through an ambient reference (design note
/// "Variable allocation as side effect").
pub trait TypeContext {
    fn fresh_variable(&mut self) -> Variable;

    /// The three-valued subtype query: delegates to
    /// `Type::is_subtype_closed` when neither side contains a `Variable`,
    /// else consults the active constraint set. `None` means "unknown",
    /// not "false".
    fn is_subtype(&self, a: &Type, b: &Type) -> Option<bool>;

    fn is_supertype(&self, a: &Type, b: &Type) -> Option<bool> {
        self.is_subtype(b, a)
    }

    /// `new_variable_supertype`: if one side already (conclusively)
    /// dominates the other, return it verbatim; otherwise allocate a fresh
    /// variable constrained above both.
    fn fresh_variable_supertype(&mut self, a: &Type, b: &Type) -> Type;

    /// `new_variable_subtype`, with a missing second bound treated as
    /// `Top` (see DESIGN.md's Open Question decisions).
    fn fresh_variable_subtype(&mut self, a: &Type, b: Option<&Type>) -> Type;

    /// Returns (allocating on first access) the attribute variable cached
    /// for `(var, name)` — the mechanism by which the interpreter
    /// discovers that a variable must have some member.
    fn attribute_variable(&mut self, var: Variable, name: &str) -> Variable;
}

fn effective_structure(mro: &[Class], overrides: &BTreeMap<String, Type>) -> BTreeMap<String, Type> {
    let mut ret = BTreeMap::new();
    for cls in mro.iter().rev() {
        for (k, v) in cls.class_members() {
            ret.insert(k.clone(), v.clone());
        }
        for (k, v) in cls.instance_members() {
            ret.insert(k.clone(), v.clone());
        }
    }
    for (k, v) in overrides {
        ret.insert(k.clone(), v.clone());
    }
    ret
}

fn dict_is_subtype(sub: &BTreeMap<String, Type>, sup: &BTreeMap<String, Type>) -> Result<bool, LatticeError> {
    for (name, sub_ty) in sub {
        match sup.get(name) {
            None => return Ok(false),
            Some(sup_ty) => {
                if !sub_ty.is_subtype_closed(sup_ty)? {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

fn dict_join(a: &BTreeMap<String, Type>, b: &BTreeMap<String, Type>, ctx: &mut dyn TypeContext) -> Result<BTreeMap<String, Type>, LatticeError> {
    let mut ret = BTreeMap::new();
    for (name, ta) in a {
        if let Some(tb) = b.get(name) {
            ret.insert(name.clone(), ta.join(tb, ctx)?);
        }
    }
    Ok(ret)
}

fn dict_meet(a: &BTreeMap<String, Type>, b: &BTreeMap<String, Type>, ctx: &mut dyn TypeContext) -> Result<BTreeMap<String, Type>, LatticeError> {
    let mut ret = BTreeMap::new();
    let names: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    for name in names {
        let merged = match (a.get(name), b.get(name)) {
            (Some(x), Some(y)) => x.meet(y, ctx)?,
            (Some(x), None) => x.clone(),
            (None, Some(y)) => y.clone(),
            (None, None) => unreachable!(),
        };
        ret.insert(name.clone(), merged);
    }
    Ok(ret)
}

fn instance_join(i1: &InstanceType, i2: &InstanceType, ctx: &mut dyn TypeContext) -> Result<Type, LatticeError> {
    let mro1 = i1.mro.classes_or_panic().to_vec();
    let mro2 = i2.mro.classes_or_panic().to_vec();
    let (shared, lost1, lost2) = mro::longest_common_subsequence(&mro1, &mro2);
    // Only the divergent ("lost") part of each side needs to be joined
    // explicitly: the shared ancestry is already captured by `shared`
    // becoming the resulting instance's own MRO, so future attribute
    // lookups on the joined instance find those members through it.
    let struct1 = effective_structure(&lost1, &i1.overrides);
    let struct2 = effective_structure(&lost2, &i2.overrides);
    let merged = dict_join(&struct1, &struct2, ctx)?;
    Ok(Type::instance(Mro::resolved(shared), merged))
}

fn instance_meet(i1: &InstanceType, i2: &InstanceType, ctx: &mut dyn TypeContext) -> Result<Type, LatticeError> {
    let mro1 = i1.mro.classes_or_panic().to_vec();
    let mro2 = i2.mro.classes_or_panic().to_vec();
    let merged_mro = mro::merge_c3(&[mro1, mro2], "<meet>")?;
    let merged_members = dict_meet(&i1.overrides, &i2.overrides, ctx)?;
    Ok(Type::instance(Mro::resolved(merged_mro), merged_members))
}

fn as_union_members(t: &Type) -> Vec<Type> {
    match t {
        Type::Union(u) => u.members.clone(),
        other => vec![other.clone()],
    }
}

fn union_join(a: &Type, b: &Type, ctx: &mut dyn TypeContext) -> Result<Type, LatticeError> {
    match (a, b) {
        (Type::Union(_), Type::Union(_)) | (Type::Union(_), Type::Function(_)) | (Type::Union(_), Type::Instance(_))
        | (Type::Function(_), Type::Union(_)) | (Type::Instance(_), Type::Union(_)) => {
            let mut members = as_union_members(a);
            members.extend(as_union_members(b));
            Ok(Type::union(members))
        }
        _ => {
            // A union meeting/joining something it has no special affinity
            // for (e.g. a bare Variable) falls back to the generic
            // fresh-variable path, matching `original_source`'s
            // `Union.join` delegating to `super().join(other)` outside the
            // Union/Function/Instance cases.
            let _ = ctx;
            let mut members = as_union_members(a);
            members.extend(as_union_members(b));
            Ok(Type::union(members))
        }
    }
}

fn union_meet(a: &Type, b: &Type, ctx: &mut dyn TypeContext) -> Result<Type, LatticeError> {
    let (union_side, other) = match (a, b) {
        (Type::Union(_), _) => (a, b),
        (_, Type::Union(_)) => (b, a),
        _ => unreachable!("union_meet called with no Union operand"),
    };
    let Type::Union(u) = union_side else { unreachable!() };
    match other {
        Type::Union(o) => {
            let members: Vec<Type> = u.members.iter().filter(|m| o.members.contains(m)).cloned().collect();
            if members.is_empty() {
                Ok(ctx.fresh_variable_subtype(union_side, Some(other)))
            } else {
                Ok(Type::union(members))
            }
        }
        Type::Function(_) | Type::Instance(_) => {
            if u.members.contains(other) {
                Ok(other.clone())
            } else {
                Ok(ctx.fresh_variable_subtype(union_side, Some(other)))
            }
        }
        _ => Ok(ctx.fresh_variable_subtype(union_side, Some(other))),
    }
}

fn bind_first_arg(t: &Type) -> Type {
    match t {
        Type::Function(f) => {
            let args = if f.args.is_empty() { Vec::new() } else { f.args[1..].to_vec() };
            Type::function(args, f.ret.clone())
        }
        other => other.clone(),
    }
}

fn instance_getattr(inst: &InstanceType, attr: &str, ctx: &mut dyn TypeContext) -> Result<Type, LatticeError> {
    if let Some(t) = inst.overrides.get(attr) {
        return Ok(t.clone());
    }
    for cls in inst.mro.classes_or_panic().iter() {
        if let Some(t) = cls.lookup_class_member(attr) {
            return Ok(bind_first_arg(t));
        }
        if let Some(t) = cls.lookup_instance_member(attr) {
            return Ok(t.clone());
        }
    }
    Ok(Type::Variable(ctx.fresh_variable()))
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Top => write!(f, "object"),
            Type::Bottom => write!(f, "nothing"),
            Type::Dynamic => write!(f, "dynamic"),
            Type::Variable(v) => write!(f, "{:?}", v),
            Type::Constant(c) => {
                write!(f, "`{:?}`(", c.value_type)?;
                for (i, v) in c.values.iter().enumerate() {
                    if i > 0 { write!(f, ",")?; }
                    write!(f, "{}", v)?;
                }
                write!(f, ")")
            }
            Type::Function(fun) => {
                write!(f, "(")?;
                for (i, a) in fun.args.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{:?}", a)?;
                }
                write!(f, ") -> {:?}", fun.ret)
            }
            Type::Instance(inst) => match inst.mro.resolved_classes() {
                Some(classes) if !classes.is_empty() => write!(f, "{}", classes[0].name()),
                _ => write!(f, "<instance {:?}>", inst.mro),
            },
            Type::Union(u) => {
                write!(f, "U(")?;
                for (i, m) in u.members.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{:?}", m)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// `FunctionType`/`InstanceType`/`UnionType`/`ConstantType` derive their
// (Partial)Eq/Hash/Ord from their fields, which bottom out at `Type`'s own
// derives above; `Mro`'s hand-written impls (see mro.rs) are what actually
// breaks the Instance/Class/MRO reference cycle directly.
#[allow(dead_code)]
fn _assert_hash_bounds() {
    fn assert_hash<T: Hash>() {}
    assert_hash::<Type>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct NullContext {
        next: u32,
    }

    impl NullContext {
        fn new() -> NullContext {
            NullContext { next: 0 }
        }
    }

    impl TypeContext for NullContext {
        fn fresh_variable(&mut self) -> Variable {
            self.next += 1;
            Variable(self.next)
        }
        fn is_subtype(&self, a: &Type, b: &Type) -> Option<bool> {
            if a.contains_variable() || b.contains_variable() {
                None
            } else {
                a.is_subtype_closed(b).ok()
            }
        }
        fn fresh_variable_supertype(&mut self, a: &Type, b: &Type) -> Type {
            if self.is_supertype(a, b) == Some(true) {
                return a.clone();
            }
            if self.is_supertype(b, a) == Some(true) {
                return b.clone();
            }
            Type::Variable(self.fresh_variable())
        }
        fn fresh_variable_subtype(&mut self, a: &Type, b: Option<&Type>) -> Type {
            let b = b.cloned().unwrap_or(Type::Top);
            if self.is_subtype(a, &b) == Some(true) {
                return a.clone();
            }
            if self.is_subtype(&b, a) == Some(true) {
                return b;
            }
            Type::Variable(self.fresh_variable())
        }
        fn attribute_variable(&mut self, _var: Variable, _name: &str) -> Variable {
            self.fresh_variable()
        }
    }

    fn class(name: &str, members: &[(&str, Type)]) -> Class {
        let mut m = BTreeMap::new();
        for (k, v) in members {
            m.insert(k.to_string(), v.clone());
        }
        Class::new(name, m, BTreeMap::new())
    }

    fn instance_of(classes: Vec<Class>) -> Type {
        Type::instance(Mro::resolved(classes), BTreeMap::new())
    }

    #[test]
    fn union_flattening_and_collapse() {
        assert_eq!(Type::union(vec![Type::Top]), Type::Top);
        assert_eq!(Type::union(vec![]), Type::Bottom);
        let nested = Type::union(vec![Type::union(vec![Type::Top, Type::Bottom]), Type::Dynamic]);
        match nested {
            Type::Union(u) => assert!(u.members.iter().all(|m| !matches!(m, Type::Union(_)))),
            _ => {}
        }
    }

    #[test]
    fn reflexivity() {
        let t = Type::function(vec![Type::Top], Type::Bottom);
        assert_eq!(t.is_subtype_closed(&t), Ok(true));
    }

    #[test]
    fn hierarchy_subtyping() {
        let object = class("object", &[]);
        let a = class("A", &[]);
        let b = class("B", &[]);
        let c = class("C", &[]);

        let c_ty = instance_of(vec![c.clone(), b.clone(), a.clone(), object.clone()]);
        let b_ty = instance_of(vec![b.clone(), a.clone(), object.clone()]);

        assert_eq!(c_ty.is_subtype_closed(&b_ty), Ok(true));
        assert_eq!(b_ty.is_subtype_closed(&c_ty), Ok(false));
    }

    #[test]
    fn function_variance() {
        let mut ctx = NullContext::new();
        let object = class("object", &[]);
        let a_ty = instance_of(vec![class("A", &[]), object.clone()]);
        let b_ty = instance_of(vec![class("B", &[]), class("A", &[]), object.clone()]);
        let c_ty = instance_of(vec![class("C", &[]), class("B", &[]), class("A", &[]), object.clone()]);

        // Fn(A -> C) <: Fn(A -> B) when C <: B.
        let f1 = Type::function(vec![a_ty.clone()], c_ty.clone());
        let f2 = Type::function(vec![a_ty.clone()], b_ty.clone());
        assert_eq!(f1.is_subtype_closed(&f2), Ok(true));
        assert_eq!(f2.is_subtype_closed(&f1), Ok(false));

        // Fn(B -> A) <: Fn(C -> A) when C <: B (contravariant parameter).
        let g1 = Type::function(vec![b_ty.clone()], a_ty.clone());
        let g2 = Type::function(vec![c_ty.clone()], a_ty.clone());
        assert_eq!(g1.is_subtype_closed(&g2), Ok(true));
        assert_eq!(g2.is_subtype_closed(&g1), Ok(false));

        let _ = &mut ctx;
    }

    #[test]
    fn join_meet_laws() {
        let mut ctx = NullContext::new();
        let t = Type::function(vec![Type::Top], Type::Bottom);
        assert_eq!(t.join(&Type::Bottom, &mut ctx), Ok(t.clone()));
        assert_eq!(t.meet(&Type::Top, &mut ctx), Ok(t.clone()));
        assert_eq!(t.join(&Type::Top, &mut ctx), Ok(Type::Top));
        assert_eq!(t.meet(&Type::Bottom, &mut ctx), Ok(Type::Bottom));
        assert_eq!(Type::Dynamic.join(&t, &mut ctx), Ok(Type::Dynamic));
        assert_eq!(Type::Dynamic.meet(&t, &mut ctx), Ok(Type::Dynamic));
    }

    #[test]
    fn substitution_idempotence() {
        let v = Variable(1);
        let target = Type::function(vec![Type::Top], Type::Bottom);
        let mut mapping = HashMap::new();
        mapping.insert(v, target.clone());
        let ty = Type::function(vec![Type::Variable(v)], Type::Variable(v));
        let once = ty.substitute(&mapping);
        let twice = once.substitute(&mapping);
        assert_eq!(once, twice);
    }

    #[test]
    fn union_of_hierarchy_is_supertype() {
        let object = class("object", &[]);
        let a = class("A", &[]);
        let b = class("B", &[]);
        let c = class("C", &[]);
        let d = class("D", &[]);

        let c_ty = instance_of(vec![c.clone(), b.clone(), object.clone()]);
        let d_ty = instance_of(vec![d.clone(), b.clone(), object.clone()]);
        let a_ty = instance_of(vec![a.clone(), object.clone()]);
        let b_ty = instance_of(vec![b.clone(), object.clone()]);

        let union_ba = Type::union(vec![b_ty.clone(), a_ty.clone()]);
        assert_eq!(c_ty.is_subtype_closed(&union_ba), Ok(true));

        let mut ctx = NullContext::new();
        let union_cd = Type::union(vec![c_ty.clone(), d_ty.clone()]);
        let joined = union_cd.join(&union_ba, &mut ctx).unwrap();
        match joined {
            Type::Union(u) => assert_eq!(u.members.len(), 4),
            _ => panic!("expected a 4-member union"),
        }
    }

    #[test]
    fn union_meet_simplification() {
        let object = class("object", &[]);
        let b = class("B", &[]);
        let a = class("A", &[]);
        let c = class("C", &[]);
        let d = class("D", &[]);

        let b_ty = instance_of(vec![b.clone(), object.clone()]);
        let a_ty = instance_of(vec![a.clone(), b.clone(), object.clone()]);
        let c_ty = instance_of(vec![c.clone(), b.clone(), object.clone()]);
        let d_ty = instance_of(vec![d.clone(), b.clone(), object.clone()]);

        let mut ctx = NullContext::new();
        let cd = Type::union(vec![c_ty.clone(), d_ty.clone()]);
        let acd = Type::union(vec![a_ty.clone(), c_ty.clone(), d_ty.clone()]);
        let met = cd.meet(&acd, &mut ctx).unwrap();
        assert_eq!(met, cd);

        let joined = cd.join(&b_ty, &mut ctx).unwrap();
        match joined {
            Type::Union(u) => assert_eq!(u.members.len(), 3),
            _ => panic!("expected 3-member union"),
        }
    }
}
