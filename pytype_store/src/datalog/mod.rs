//! The Datalog solver backend (component E). Grounded on
//! `original_source/byterun/constraint/datalog_encoder.py`:
//! `DatalogEncoder` walks the structural closure of a store's active
//! constraints, assigns every distinct type an opaque atom id, emits the
//! fact predicates below, concatenates them after the static header rule
//! file embedded from `subtyping.dl`, and hands the program to an
//! external fixpoint evaluator. The evaluator itself (e.g. XSB) is out of
//! scope; this module only produces its input and parses its output.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read as _;
use std::process::{Command, Stdio};

use pytype_diag::SolverError;
use pytype_lattice::Type;

use crate::closure::{structural_closure, NoopProcessor};
use crate::store::{ConstraintStore, ConstraintTag};

const HEADER: &str = include_str!("subtyping.dl");

/// Knobs the original module hard-coded as globals: the path to the
/// external evaluator binary (`"xsb"` on the developer's `$PATH` by
/// default).
#[derive(Clone, Debug)]
pub struct DatalogConfig {
    pub evaluator_path: String,
}

impl Default for DatalogConfig {
    fn default() -> DatalogConfig {
        DatalogConfig { evaluator_path: "xsb".to_string() }
    }
}

/// Memoizes one opaque id per distinct `Type`, emitting each type's fact
/// the first time it is seen. Ids are reserved before a type's children
/// are visited so that a class whose method signature mentions its own
/// instance type does not recurse forever.
struct Encoder {
    ids: BTreeMap<Type, u32>,
    next_id: u32,
}

impl Encoder {
    fn new() -> Encoder {
        // 0 is reserved as the nil sentinel terminating tuple/mro/union chains.
        Encoder { ids: BTreeMap::new(), next_id: 1 }
    }

    fn fresh_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn encode_chain(&mut self, predicate: &str, heads: Vec<String>, out: &mut String) -> u32 {
        let mut tail = 0u32;
        for h in heads.into_iter().rev() {
            let cell = self.fresh_id();
            out.push_str(&format!("{}({}, {}, {}).\n", predicate, cell, h, tail));
            tail = cell;
        }
        tail
    }

    fn id_for(&mut self, t: &Type, out: &mut String) -> u32 {
        if let Some(&id) = self.ids.get(t) {
            return id;
        }
        let id = self.fresh_id();
        self.ids.insert(t.clone(), id);
        out.push_str(&format!("repr({}, {:?}).\n", id, format!("{:?}", t)));
        match t {
            Type::Top => out.push_str(&format!("object({}).\n", id)),
            Type::Bottom => out.push_str(&format!("nothing({}).\n", id)),
            Type::Dynamic => out.push_str(&format!("dynamic_type({}).\n", id)),
            Type::Variable(_) => out.push_str(&format!("variable({}).\n", id)),
            Type::Constant(c) => {
                let vid = self.id_for(&c.value_type, out);
                out.push_str(&format!("constant({}, {}).\n", id, vid));
            }
            Type::Function(f) => {
                let arg_ids: Vec<u32> = f.args.iter().map(|a| self.id_for(a, out)).collect();
                let tuple_id = self.encode_chain("tuple", arg_ids.iter().map(u32::to_string).collect(), out);
                let ret_id = self.id_for(&f.ret, out);
                out.push_str(&format!("function({}, {}, {}).\n", id, tuple_id, ret_id));
            }
            Type::Instance(i) => {
                let classes = i.mro.classes_or_panic();
                let mro_id =
                    self.encode_chain("mro", classes.iter().map(|c| format!("'{}'", c.name())).collect(), out);
                let structure = i.effective_structure();
                let member_ids: Vec<u32> = structure.values().map(|m| self.id_for(m, out)).collect();
                let tuple_id = self.encode_chain("tuple", member_ids.iter().map(u32::to_string).collect(), out);
                out.push_str(&format!("instance({}, {}, {}).\n", id, mro_id, tuple_id));
            }
            Type::Union(u) => {
                let member_ids: Vec<u32> = u.members.iter().map(|m| self.id_for(m, out)).collect();
                if let Some((first, rest)) = member_ids.split_first() {
                    let tail = self.encode_chain("union", rest.iter().map(u32::to_string).collect(), out);
                    out.push_str(&format!("union({}, {}, {}).\n", id, first, tail));
                }
            }
        }
        id
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

/// Walks a store's active constraints, emits the Datalog program, runs the
/// evaluator, and decodes `RESULT: <a> <b>` lines back into `(Type, Type)`
/// subtype pairs.
pub struct DatalogEncoder {
    config: DatalogConfig,
}

impl DatalogEncoder {
    pub fn new(config: DatalogConfig) -> DatalogEncoder {
        DatalogEncoder { config }
    }

    /// Emits the fact base for `store` without the header or without
    /// running anything — exposed mainly for tests and for callers who
    /// want to inspect the generated program.
    pub fn encode(&self, store: &ConstraintStore) -> String {
        let universe = structural_closure(seeds_from_store(store), &mut NoopProcessor);
        let mut enc = Encoder::new();
        let mut facts = String::new();
        for t in &universe {
            enc.id_for(t, &mut facts);
        }
        for c in store.active() {
            if c.tag == ConstraintTag::Subtype {
                let l = enc.id_for(&c.left, &mut facts);
                let r = enc.id_for(&c.right, &mut facts);
                facts.push_str(&format!("subtype({}, {}).\n", l, r));
            }
        }
        facts
    }

    pub fn solve(&self, store: &ConstraintStore) -> Result<Vec<(Type, Type)>, SolverError> {
        let universe = structural_closure(seeds_from_store(store), &mut NoopProcessor);
        let mut enc = Encoder::new();
        let mut facts = String::new();
        for t in &universe {
            enc.id_for(t, &mut facts);
        }
        for c in store.active() {
            if c.tag == ConstraintTag::Subtype {
                let l = enc.id_for(&c.left, &mut facts);
                let r = enc.id_for(&c.right, &mut facts);
                facts.push_str(&format!("subtype({}, {}).\n", l, r));
            }
        }
        let program = format!("{}\n{}", HEADER, facts);

        let dir = std::env::temp_dir();
        let file_stem = format!("pytype_infer_{}_{}", std::process::id(), enc.next_id);
        let path = dir.join(format!("{}.P", file_stem));
        fs::write(&path, &program).map_err(|e| SolverError::SubprocessFailure(e.to_string()))?;

        let run = self.run_evaluator(&dir, &file_stem, &path);
        let _ = fs::remove_file(&path);
        let output = run?;

        let reverse: BTreeMap<u32, Type> = enc.ids.iter().map(|(t, id)| (*id, t.clone())).collect();
        let mut results = Vec::new();
        for line in output.lines() {
            if let Some(rest) = line.strip_prefix("RESULT:") {
                let parts: Vec<&str> = rest.trim().split_whitespace().collect();
                if parts.len() != 2 {
                    continue;
                }
                if let (Ok(a), Ok(b)) = (parts[0].parse::<u32>(), parts[1].parse::<u32>()) {
                    if let (Some(ta), Some(tb)) = (reverse.get(&a), reverse.get(&b)) {
                        results.push((ta.clone(), tb.clone()));
                    }
                }
            }
        }
        log::info!("datalog solve: {} result facts decoded", results.len());
        Ok(results)
    }

    fn run_evaluator(&self, dir: &std::path::Path, module_name: &str, _path: &std::path::Path) -> Result<String, SolverError> {
        let mut child = Command::new(&self.config.evaluator_path)
            .arg(module_name)
            .current_dir(dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SolverError::SubprocessFailure(e.to_string()))?;

        // Drain stdout fully before the child handle is dropped, so a
        // pipe buffer filling up cannot deadlock against the child exiting.
        let mut output = String::new();
        if let Some(mut stdout) = child.stdout.take() {
            stdout.read_to_string(&mut output).map_err(|e| SolverError::SubprocessFailure(e.to_string()))?;
        }
        let status = child.wait().map_err(|e| SolverError::SubprocessFailure(e.to_string()))?;
        if !status.success() {
            return Err(SolverError::SubprocessFailure(format!("evaluator exited with {}", status)));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pytype_lattice::{Class, Mro, TypeContext};
    use std::collections::BTreeMap as Map;

    #[test]
    fn encode_emits_one_fact_per_active_subtype_constraint() {
        let mut store = ConstraintStore::new();
        let object = Class::new("object", Map::new(), Map::new());
        let a = Type::instance(Mro::resolved(vec![Class::new("A", Map::new(), Map::new()), object.clone()]), Map::new());
        let b = Type::instance(Mro::resolved(vec![Class::new("B", Map::new(), Map::new()), object]), Map::new());
        store.add_subtype(&a, &b);

        let enc = DatalogEncoder::new(DatalogConfig::default());
        let facts = enc.encode(&store);
        assert_eq!(facts.lines().filter(|l| l.starts_with("subtype(")).count(), 1);
        assert!(facts.lines().any(|l| l.starts_with("object(")));
        assert!(facts.lines().any(|l| l.starts_with("nothing(")));
    }

    #[test]
    fn encode_is_stable_across_runs_for_the_same_store() {
        let mut store = ConstraintStore::new();
        let v = store.fresh_variable();
        store.add_subtype(&Type::Variable(v), &Type::Top);
        let enc = DatalogEncoder::new(DatalogConfig::default());
        assert_eq!(enc.encode(&store), enc.encode(&store));
    }
}
