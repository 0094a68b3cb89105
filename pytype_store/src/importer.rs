//! Builtin importer glue (component G). Grounded on
//! `original_source/byterun/pytd.py`'s `PyTDImportVisitor`: turns a flat
//! list of external declarations into `Type`s and populated `Mro`s, one
//! pass to build every class's `Mro::unresolved` handle (so a method
//! signature that mentions its own class's instance type resolves),
//! then a second pass that fills each one in via `compute_mro`.

use std::collections::BTreeMap;

use pytype_diag::{LatticeError, StoreError};
use pytype_lattice::{mro, Class, FunctionType, Mro, Type};

/// One external declaration the caller's parser produced. The parser
/// itself — reading `.pyi`-style stub text into this shape — is out of
/// scope; this module only consumes the result.
#[derive(Clone)]
pub enum Declaration {
    Class { name: String, parents: Vec<String>, methods: Vec<MethodDecl>, constants: BTreeMap<String, Type> },
    Function { name: String, signature: FunctionType },
    Constant { name: String, value: Type },
}

#[derive(Clone)]
pub struct MethodDecl {
    pub name: String,
    /// One entry per overload; only the first is kept, with a warning
    /// logged for the discarded ones.
    pub signatures: Vec<FunctionType>,
}

/// The result of importing a declaration list: every declared name bound
/// to its `Type`, plus every class's resolved `Mro` for callers that want
/// to walk the inheritance graph directly.
#[derive(Default)]
pub struct ImportedModule {
    pub bindings: BTreeMap<String, Type>,
    pub classes: BTreeMap<String, Mro>,
}

/// `compute_mro` from `pytd.py`: a class with no declared parents
/// implicitly inherits from `object`.
pub fn compute_mro(
    name: &str,
    parents: &[String],
    class_by_name: &BTreeMap<String, (Class, Mro)>,
) -> Result<Vec<Class>, LatticeError> {
    if parents.is_empty() {
        let object = class_by_name
            .get("object")
            .map(|(c, _)| c.clone())
            .unwrap_or_else(|| Class::new("object", BTreeMap::new(), BTreeMap::new()));
        return Ok(vec![object]);
    }
    let mut seqs = Vec::new();
    let mut direct_parents = Vec::new();
    for p in parents {
        match class_by_name.get(p) {
            Some((class, parent_mro)) => {
                direct_parents.push(class.clone());
                if let Some(classes) = parent_mro.resolved_classes() {
                    seqs.push(classes.to_vec());
                } else {
                    return Err(LatticeError::IllegalInheritance { class_name: name.to_string() });
                }
            }
            None => {
                log::warn!("import: class {:?} has unknown parent {:?}, treating as object", name, p);
                direct_parents.push(Class::new(p.clone(), BTreeMap::new(), BTreeMap::new()));
            }
        }
    }
    seqs.push(direct_parents);
    mro::merge_c3(&seqs, name)
}

/// The first declared overload of a method, or `None` if the caller
/// supplied no signatures at all (a method the external parser could not
/// resolve any overload for).
fn first_overload(name: &str, owner: &str, sigs: &[FunctionType]) -> Option<FunctionType> {
    if sigs.is_empty() {
        return None;
    }
    if sigs.len() > 1 {
        log::warn!("import: method {:?} on {:?} has {} overloads, keeping only the first", name, owner, sigs.len());
    }
    Some(sigs[0].clone())
}

/// Imports a flat declaration list into bindings plus resolved MROs.
/// Classes are processed in two passes so that a method whose signature
/// mentions its own class's instance type can reference an `Mro` handle
/// that already exists, the same late-binding idea applied here to
/// import order rather than to runtime evaluation.
pub fn import_declarations(decls: &[Declaration]) -> Result<ImportedModule, StoreError> {
    let mut handles: BTreeMap<String, Mro> = BTreeMap::new();
    for d in decls {
        if let Declaration::Class { name, .. } = d {
            handles.insert(name.clone(), Mro::unresolved());
        }
    }
    if !handles.contains_key("object") {
        handles.insert("object".to_string(), Mro::resolved(vec![Class::new("object", BTreeMap::new(), BTreeMap::new())]));
    }

    let mut result = ImportedModule::default();
    let mut class_by_name: BTreeMap<String, (Class, Mro)> = BTreeMap::new();

    // First pass: build each class's own Class record (instance methods
    // bind `self` as the class's own, still-unresolved, instance type).
    for d in decls {
        if let Declaration::Class { name, methods, constants, .. } = d {
            let handle = handles[name].clone();
            let self_type = Type::instance(handle.clone(), BTreeMap::new());
            let mut instance_members = BTreeMap::new();
            for m in methods {
                let member_ty = match first_overload(&m.name, name, &m.signatures) {
                    Some(mut sig) => {
                        if sig.args.is_empty() {
                            sig.args.push(self_type.clone());
                        } else {
                            sig.args[0] = self_type.clone();
                        }
                        Type::function(sig.args, sig.ret)
                    }
                    None => unknown_declaration_to_dynamic(&m.name, "method"),
                };
                instance_members.insert(m.name.clone(), member_ty);
            }
            let class = Class::new(name.clone(), constants.clone(), instance_members);
            class_by_name.insert(name.clone(), (class, handle));
        }
    }

    // Second pass: resolve every class's MRO now that every class record
    // exists to look parents up by name.
    for d in decls {
        if let Declaration::Class { name, parents, .. } = d {
            if name == "object" {
                continue;
            }
            let classes = compute_mro(name, parents, &class_by_name)?;
            let (own_class, _) = class_by_name[name].clone();
            let mut full = vec![own_class];
            full.extend(classes);
            handles[name].resolve(full).map_err(StoreError::from)?;
        }
    }
    if let Some(handle) = handles.get("object") {
        if !handle.is_resolved() {
            handle.resolve(vec![Class::new("object", BTreeMap::new(), BTreeMap::new())]).map_err(StoreError::from)?;
        }
    }

    for (name, handle) in &handles {
        result.classes.insert(name.clone(), handle.clone());
        result.bindings.insert(name.clone(), Type::instance(handle.clone(), BTreeMap::new()));
    }

    for d in decls {
        match d {
            Declaration::Class { .. } => {}
            Declaration::Function { name, signature } => {
                result.bindings.insert(name.clone(), Type::function(signature.args.clone(), signature.ret.clone()));
            }
            Declaration::Constant { name, value } => {
                result.bindings.insert(name.clone(), value.clone());
            }
        }
    }

    Ok(result)
}

/// Maps a declaration kind this importer does not recognize to
/// `Type::Dynamic`, with a warning — the fallback for forward
/// compatibility with declaration kinds added after this crate.
pub fn unknown_declaration_to_dynamic(name: &str, kind: &str) -> Type {
    log::warn!("import: unsupported declaration {:?} of kind {:?}, treating as dynamic", name, kind);
    Type::Dynamic
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_with_no_parents_inherits_object() {
        let decls = vec![Declaration::Class {
            name: "Point".to_string(),
            parents: vec![],
            methods: vec![],
            constants: BTreeMap::new(),
        }];
        let imported = import_declarations(&decls).unwrap();
        let mro = &imported.classes["Point"];
        let classes = mro.resolved_classes().unwrap();
        assert_eq!(classes.iter().map(Class::name).collect::<Vec<_>>(), vec!["Point", "object"]);
    }

    #[test]
    fn diamond_inheritance_resolves_via_c3() {
        let decls = vec![
            Declaration::Class { name: "A".to_string(), parents: vec![], methods: vec![], constants: BTreeMap::new() },
            Declaration::Class { name: "B".to_string(), parents: vec![], methods: vec![], constants: BTreeMap::new() },
            Declaration::Class {
                name: "C".to_string(),
                parents: vec!["A".to_string(), "B".to_string()],
                methods: vec![],
                constants: BTreeMap::new(),
            },
        ];
        let imported = import_declarations(&decls).unwrap();
        let classes = imported.classes["C"].resolved_classes().unwrap();
        assert_eq!(classes.iter().map(Class::name).collect::<Vec<_>>(), vec!["C", "A", "B", "object"]);
    }

    #[test]
    fn multi_signature_method_keeps_first_overload() {
        let sig1 = FunctionType { args: vec![Type::Dynamic], ret: Type::Top };
        let sig2 = FunctionType { args: vec![Type::Dynamic, Type::Dynamic], ret: Type::Bottom };
        let decls = vec![Declaration::Class {
            name: "Widget".to_string(),
            parents: vec![],
            methods: vec![MethodDecl { name: "resize".to_string(), signatures: vec![sig1, sig2] }],
            constants: BTreeMap::new(),
        }];
        let imported = import_declarations(&decls).unwrap();
        let classes = imported.classes["Widget"].resolved_classes().unwrap();
        let widget = &classes[0];
        let resize = widget.lookup_instance_member("resize").unwrap();
        match resize {
            Type::Function(f) => assert_eq!(f.ret, Type::Top),
            other => panic!("expected a function type, got {:?}", other),
        }
    }

    #[test]
    fn method_with_no_overloads_becomes_dynamic() {
        let decls = vec![Declaration::Class {
            name: "Widget".to_string(),
            parents: vec![],
            methods: vec![MethodDecl { name: "resize".to_string(), signatures: vec![] }],
            constants: BTreeMap::new(),
        }];
        let imported = import_declarations(&decls).unwrap();
        let classes = imported.classes["Widget"].resolved_classes().unwrap();
        let widget = &classes[0];
        assert_eq!(widget.lookup_instance_member("resize"), Some(&Type::Dynamic));
    }

    #[test]
    fn unknown_declaration_becomes_dynamic() {
        assert_eq!(unknown_declaration_to_dynamic("mystery", "alias"), Type::Dynamic);
    }
}
