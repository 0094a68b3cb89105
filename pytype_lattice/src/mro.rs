use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use pytype_diag::LatticeError;

use crate::class::Class;

/// The method resolution order of an `Instance`, as a late-bindable handle.
///
/// A class's method signatures can mention an instance of the class
/// itself, so the MRO backing an `Instance` has to be constructible
/// before the class's own member list is known and filled in once that
/// list is ready. `kailua_check::ty::slot::Slot` uses `Arc<RwLock<S>>` for
/// a structurally similar "fill in later, read many times" need; this
/// crate uses the single-threaded analogue `Rc<RefCell<..>>` since
/// abstract interpretation here runs as a single-threaded cooperative
/// scheduler with no parallelism inside the core.
#[derive(Clone)]
pub struct Mro(Rc<RefCell<Option<Vec<Class>>>>);

impl Mro {
    /// A handle with no classes yet; call `resolve` once they are known.
    pub fn unresolved() -> Mro {
        Mro(Rc::new(RefCell::new(None)))
    }

    /// A handle that is already resolved, for classes with no forward
    /// references to themselves.
    pub fn resolved(classes: Vec<Class>) -> Mro {
        Mro(Rc::new(RefCell::new(Some(classes))))
    }

    /// Fills in the classes of a handle created with `unresolved`. Fails if
    /// the handle was already resolved — a second resolution is a bug in
    /// the caller, not something a well-behaved importer or interpreter
    /// should trigger.
    pub fn resolve(&self, classes: Vec<Class>) -> Result<(), LatticeError> {
        let mut slot = self.0.borrow_mut();
        if slot.is_some() {
            return Err(LatticeError::MroAlreadyResolved);
        }
        *slot = Some(classes);
        Ok(())
    }

    /// The resolved class sequence, or `None` if this handle is still
    /// being built. Panic-free counterpart to the Python `MRO.classes`
    /// property, which raises `ValueError` on an unset MRO — panics are
    /// reserved for internal bugs, not for states a caller might
    /// reasonably observe.
    pub fn resolved_classes(&self) -> Option<std::cell::Ref<[Class]>> {
        let r = self.0.borrow();
        if r.is_some() {
            Some(std::cell::Ref::map(r, |o| o.as_deref().unwrap()))
        } else {
            None
        }
    }

    /// Like `resolved_classes`, but panics if unresolved. Reserved for call
    /// sites downstream of structural closure, where an unresolved MRO
    /// really would mean the abstract interpreter emitted a constraint
    /// before finishing a class declaration — an internal bug, not a
    /// condition external input can trigger.
    pub fn classes_or_panic(&self) -> std::cell::Ref<[Class]> {
        self.resolved_classes().expect("Mro used before it was resolved")
    }

    pub fn is_resolved(&self) -> bool {
        self.0.borrow().is_some()
    }

    fn snapshot(&self) -> Option<Vec<Class>> {
        self.0.borrow().clone()
    }
}

/// Two MROs are equal when their class sequences are equal; an unresolved
/// MRO compares equal only to itself (by handle identity), since it has no
/// sequence yet to compare structurally. MRO-handle identity provides
/// stable hashing during construction — note that an `Mro`'s hash
/// necessarily changes once it is resolved, so
/// callers must not use an unresolved `Mro` as a long-lived hash key (see
/// DESIGN.md).
impl PartialEq for Mro {
    fn eq(&self, other: &Mro) -> bool {
        if Rc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        match (self.snapshot(), other.snapshot()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Mro {}

impl Hash for Mro {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.snapshot() {
            Some(classes) => classes.iter().for_each(|c| c.name().hash(state)),
            None => (Rc::as_ptr(&self.0) as usize).hash(state),
        }
    }
}

/// Resolved MROs compare by class sequence; two unresolved handles compare
/// by pointer address (arbitrary but stable for the lifetime of the
/// process), and an unresolved handle always sorts before any resolved one.
/// Exists only to give `Union` members a canonical sort key — see the note
/// on `PartialOrd for Class`.
impl PartialOrd for Mro {
    fn partial_cmp(&self, other: &Mro) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Mro {
    fn cmp(&self, other: &Mro) -> Ordering {
        match (self.snapshot(), other.snapshot()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => (Rc::as_ptr(&self.0) as usize).cmp(&(Rc::as_ptr(&other.0) as usize)),
        }
    }
}

impl fmt::Debug for Mro {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.snapshot() {
            Some(classes) => {
                write!(f, "Mro(")?;
                for (i, c) in classes.iter().enumerate() {
                    if i > 0 { write!(f, " -> ")?; }
                    write!(f, "{}", c.name())?;
                }
                write!(f, ")")
            }
            None => write!(f, "Mro(<unresolved #{:x}>)", Rc::as_ptr(&self.0) as usize),
        }
    }
}

/// C3-merges a sequence of ancestor MROs (each already linearized, head
/// first) plus the direct parent list into a single consistent order.
///
/// Grounded line-by-line on `original_source`'s `merge_mros`, itself a
/// transcription of the reference C3 algorithm: repeatedly take the head of
/// some input sequence that does not occur in the tail of any other
/// sequence, until all sequences are exhausted.
pub fn merge_c3(seqs: &[Vec<Class>], class_name: &str) -> Result<Vec<Class>, LatticeError> {
    let mut seqs: Vec<Vec<Class>> = seqs.iter().cloned().collect();
    let mut result = Vec::new();
    loop {
        seqs.retain(|s| !s.is_empty());
        if seqs.is_empty() {
            return Ok(result);
        }

        let mut candidate = None;
        'find_head: for seq in &seqs {
            let head = &seq[0];
            for other in &seqs {
                if other[1..].iter().any(|c| c == head) {
                    continue 'find_head;
                }
            }
            candidate = Some(head.clone());
            break;
        }

        let candidate = match candidate {
            Some(c) => c,
            None => {
                return Err(LatticeError::IllegalInheritance { class_name: class_name.to_string() });
            }
        };

        result.push(candidate.clone());
        for seq in &mut seqs {
            if seq[0] == candidate {
                seq.remove(0);
            }
        }
    }
}

/// True if every element of `left` occurs in `right`, in the same relative
/// order (not necessarily contiguous). Used for the nominal half of
/// instance subtyping: a subclass's MRO is a supersequence of any of its
/// supertypes' MROs.
pub fn is_subsequence(left: &[Class], right: &[Class]) -> bool {
    let mut right_iter = right.iter();
    'outer: for item in left {
        for candidate in right_iter.by_ref() {
            if candidate == item {
                continue 'outer;
            }
        }
        return false;
    }
    true
}

/// The longest common subsequence of two class sequences, plus the
/// elements of each input that were not used. Used to join two instance
/// types' MROs down to their shared nominal ancestry.
pub fn longest_common_subsequence(seq1: &[Class], seq2: &[Class]) -> (Vec<Class>, Vec<Class>, Vec<Class>) {
    let (n, m) = (seq1.len(), seq2.len());
    let mut table = vec![vec![0usize; m + 1]; n + 1];
    for i in 1..=n {
        for j in 1..=m {
            table[i][j] = if seq1[i - 1] == seq2[j - 1] {
                table[i - 1][j - 1] + 1
            } else {
                table[i - 1][j].max(table[i][j - 1])
            };
        }
    }

    let (mut i, mut j) = (n, m);
    let mut lcs = Vec::new();
    let mut lost1 = Vec::new();
    let mut lost2 = Vec::new();
    while i > 0 && j > 0 {
        if seq1[i - 1] == seq2[j - 1] {
            lcs.push(seq1[i - 1].clone());
            i -= 1;
            j -= 1;
        } else if table[i - 1][j] >= table[i][j - 1] {
            lost1.push(seq1[i - 1].clone());
            i -= 1;
        } else {
            lost2.push(seq2[j - 1].clone());
            j -= 1;
        }
    }
    while i > 0 { lost1.push(seq1[i - 1].clone()); i -= 1; }
    while j > 0 { lost2.push(seq2[j - 1].clone()); j -= 1; }

    lcs.reverse();
    lost1.reverse();
    lost2.reverse();
    (lcs, lost1, lost2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn class(name: &str) -> Class {
        Class::new(name, BTreeMap::new(), BTreeMap::new())
    }

    #[test]
    fn diamond_inheritance_c3() {
        let object = vec![class("object")];
        let a = vec![class("A"), class("object")];
        let b = vec![class("B"), class("object")];
        let c = merge_c3(&[vec![class("C")], a.clone(), b.clone(), vec![class("A"), class("B")]], "C").unwrap();
        assert_eq!(c.iter().map(Class::name).collect::<Vec<_>>(), vec!["C", "A", "B", "object"]);
        let _ = object;
    }

    #[test]
    fn illegal_inheritance_is_rejected() {
        // Two classes whose parent orders directly contradict each other.
        let seq1 = vec![class("A"), class("B")];
        let seq2 = vec![class("B"), class("A")];
        let err = merge_c3(&[vec![class("X")], seq1, seq2], "X").unwrap_err();
        assert_eq!(err, LatticeError::IllegalInheritance { class_name: "X".to_string() });
    }

    #[test]
    fn subsequence_check() {
        let a = class("A");
        let b = class("B");
        let c = class("C");
        assert!(is_subsequence(&[a.clone(), c.clone()], &[a.clone(), b.clone(), c.clone()]));
        assert!(!is_subsequence(&[c.clone(), a.clone()], &[a, b, c]));
    }

    #[test]
    fn lcs_basic() {
        let a = class("A");
        let b = class("B");
        let c = class("C");
        let d = class("D");
        let (lcs, lost1, lost2) = longest_common_subsequence(
            &[c.clone(), a.clone()],
            &[b.clone(), a.clone()],
        );
        assert_eq!(lcs, vec![a]);
        assert_eq!(lost1, vec![c]);
        assert_eq!(lost2, vec![b]);
        let _ = d;
    }
}
