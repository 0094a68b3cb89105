//! Minimal Tseitin-to-CNF layer over `varisat`, grounded on
//! `original_source/byterun/constraint/sat_encoder.py`'s own thin wrapper
//! around its MiniSat-family solver: `assign`/`equals`/`implies` build
//! ordinary clauses, `prefer` records a soft assumption tried before the
//! solver falls back to an unconstrained search.

use varisat::{ExtendFormula, Lit, Var};

pub struct SatEngine {
    solver: varisat::Solver<'static>,
    preferred: Vec<Lit>,
}

impl SatEngine {
    pub fn new() -> SatEngine {
        SatEngine { solver: varisat::Solver::new(), preferred: Vec::new() }
    }

    pub fn fresh_var(&mut self) -> Var {
        self.solver.new_var()
    }

    /// Forces `lit` to `value` — used for the "Known" clause family (facts
    /// already settled by `is_subtype_closed` before the solver ever runs).
    pub fn assign(&mut self, lit: Lit, value: bool) {
        let l = if value { lit } else { !lit };
        self.solver.add_clause(&[l]);
    }

    /// Ties two propositions to the same truth value (Tseitin equivalence).
    pub fn equals(&mut self, a: Lit, b: Lit) {
        self.solver.add_clause(&[!a, b]);
        self.solver.add_clause(&[!b, a]);
    }

    pub fn implies(&mut self, a: Lit, b: Lit) {
        self.solver.add_clause(&[!a, b]);
    }

    /// `a <-> (b1 AND b2 AND ... AND bn)`, the Tseitin AND-gate encoding
    /// used for "this structural relation holds iff every member relation
    /// holds" clauses (instance and function structural families).
    pub fn equals_conjunction(&mut self, a: Lit, bs: &[Lit]) {
        for &b in bs {
            self.solver.add_clause(&[!a, b]);
        }
        let mut clause: Vec<Lit> = bs.iter().map(|&b| !b).collect();
        clause.push(a);
        self.solver.add_clause(&clause);
    }

    /// `a <-> (b1 OR b2 OR ... OR bn)`, used for the union clause family.
    pub fn equals_disjunction(&mut self, a: Lit, bs: &[Lit]) {
        for &b in bs {
            self.solver.add_clause(&[!b, a]);
        }
        let mut clause: Vec<Lit> = bs.to_vec();
        clause.push(!a);
        self.solver.add_clause(&clause);
    }

    pub fn add_clause(&mut self, lits: &[Lit]) {
        self.solver.add_clause(lits);
    }

    /// Records a literal the solver should try to satisfy before falling
    /// back to an unconstrained search — the closest this wrapper gets to
    /// the original's objective function without pulling in a MaxSAT
    /// solver, per SPEC_FULL.md's note on this deliberate simplification.
    pub fn prefer(&mut self, lit: Lit) {
        self.preferred.push(lit);
    }

    pub fn solve(&mut self) -> Result<bool, String> {
        self.solver.assume(&self.preferred);
        if self.solver.solve().map_err(|e| e.to_string())? {
            return Ok(true);
        }
        self.solver.assume(&[]);
        self.solver.solve().map_err(|e| e.to_string())
    }

    pub fn value(&self, var: Var) -> Option<bool> {
        let model = self.solver.model()?;
        model.iter().find(|l| l.var() == var).map(|l| l.is_positive())
    }
}

impl Default for SatEngine {
    fn default() -> SatEngine {
        SatEngine::new()
    }
}
