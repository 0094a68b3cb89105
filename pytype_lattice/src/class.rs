use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::ty::Type;

/// A named record of class-level and instance-level members.
///
/// Classes are not themselves types; they live inside the `Mro` of an
/// `Instance`. Grounded on `original_source`'s `types.Class`
/// (a `namedtuple` of `class_members`, `instance_members`, `name`) and on
/// `kailua_types::ty::mod::Class`'s nominal identifier, though unlike
/// `kailua_types` (which keys classes by a numeric `ClassId` resolved
/// through a side table) this crate keeps the members inline: bytecode
/// abstract interpretation builds classes far less often than kailua's
/// checker re-reads them, so the simpler representation is worth it.
#[derive(Clone)]
pub struct Class {
    name: Rc<str>,
    class_members: Rc<BTreeMap<String, Type>>,
    instance_members: Rc<BTreeMap<String, Type>>,
}

impl Class {
    pub fn new(
        name: impl Into<Rc<str>>,
        class_members: BTreeMap<String, Type>,
        instance_members: BTreeMap<String, Type>,
    ) -> Class {
        Class {
            name: name.into(),
            class_members: Rc::new(class_members),
            instance_members: Rc::new(instance_members),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_members(&self) -> &BTreeMap<String, Type> {
        &self.class_members
    }

    pub fn instance_members(&self) -> &BTreeMap<String, Type> {
        &self.instance_members
    }

    pub fn lookup_class_member(&self, attr: &str) -> Option<&Type> {
        self.class_members.get(attr)
    }

    pub fn lookup_instance_member(&self, attr: &str) -> Option<&Type> {
        self.instance_members.get(attr)
    }
}

/// Equality is by name plus member *values*, not keys — comparing keys
/// would force us to hash/compare the member maps' shape while still
/// walking into member types that may (through a method signature
/// mentioning `self`) reference this very class. Comparing the sorted
/// value sequences instead
/// breaks the recursion the same way the Python implementation's
/// `.values()` comparison does, while staying deterministic (Rust's
/// `BTreeMap` iterates in key order, unlike the insertion-ordered `dict`
/// the original relies on — see DESIGN.md).
impl PartialEq for Class {
    fn eq(&self, other: &Class) -> bool {
        if Rc::ptr_eq(&self.class_members, &other.class_members)
            && Rc::ptr_eq(&self.instance_members, &other.instance_members)
            && self.name == other.name
        {
            return true;
        }
        self.name == other.name
            && self.class_members.values().eq(other.class_members.values())
            && self.instance_members.values().eq(other.instance_members.values())
    }
}

impl Eq for Class {}

/// Ordered the same way equality is computed — by name, then by the
/// sorted member value sequences — purely so a `Vec<Class>` (an `Mro`'s
/// resolved form) has a canonical total order. Used to give `Union`
/// members a deterministic sort key; the ordering itself carries no
/// lattice meaning.
impl PartialOrd for Class {
    fn partial_cmp(&self, other: &Class) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Class {
    fn cmp(&self, other: &Class) -> Ordering {
        self.name.cmp(&other.name).then_with(|| {
            let a: Vec<&Type> = self.class_members.values().collect();
            let b: Vec<&Type> = other.class_members.values().collect();
            a.cmp(&b)
        }).then_with(|| {
            let a: Vec<&Type> = self.instance_members.values().collect();
            let b: Vec<&Type> = other.instance_members.values().collect();
            a.cmp(&b)
        })
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Class({:?})", self.name)
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
