// func.rs — Pipeline functions and their definitions
//
// A `Function` is a named pure producer over integer indices: an initial
// definition, zero or more update definitions, and optionally an external
// implementation. Each definition carries its own `StageSchedule`.
//
// Preconditions: produced by the front-end; read-only during lowering.
// Postconditions: none (data-only module plus scheduling setters).
// Failure modes: scheduling setters panic on unknown dims (front-end bug).
// Side effects: none.

use crate::ir::{var, Expr, Type};
use crate::schedule::{Bound, FusedPair, LoopLevel, ReductionVariable, StageSchedule};

// ── Definitions ────────────────────────────────────────────────────────────

/// One stage of a function: where it writes, what it writes, and how its
/// loops are scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    /// Index expressions written to. For the initial definition these are
    /// the pure vars; updates may use arbitrary expressions.
    pub args: Vec<Expr>,
    /// Values produced (one per output).
    pub values: Vec<Expr>,
    pub schedule: StageSchedule,
    /// Extra guards (reduction-domain predicates) that must hold.
    pub split_predicate: Vec<Expr>,
    /// Ordered alternatives; the first matching condition wins at runtime.
    pub specializations: Vec<Specialization>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Specialization {
    pub condition: Expr,
    pub definition: Definition,
}

impl Definition {
    /// The initial definition over `pure_args`.
    pub fn pure(pure_args: &[String], values: Vec<Expr>) -> Self {
        Definition {
            args: pure_args.iter().map(|a| var(a.clone())).collect(),
            values,
            schedule: StageSchedule::for_args(pure_args),
            split_predicate: Vec::new(),
            specializations: Vec::new(),
        }
    }

    /// An update definition writing `args` (expressions over pure vars and
    /// reduction vars).
    pub fn update(pure_args: &[String], args: Vec<Expr>, values: Vec<Expr>) -> Self {
        Definition {
            args,
            values,
            schedule: StageSchedule::for_args(pure_args),
            split_predicate: Vec::new(),
            specializations: Vec::new(),
        }
    }
}

// ── Extern definitions ─────────────────────────────────────────────────────

/// One argument to an external stage implementation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternArgument {
    /// A scalar expression, passed through qualified.
    Expr(Expr),
    /// Another pipeline function; lowered to its per-output buffer handles.
    Func(String),
    /// A concrete buffer bound at pipeline construction.
    Buffer(String),
    /// A runtime image parameter. Not sanitizer-annotated: the caller
    /// fills both the descriptor and the contents.
    ImageParam(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExternDefinition {
    pub name: String,
    pub args: Vec<ExternArgument>,
}

// ── Function ───────────────────────────────────────────────────────────────

/// A named producer defined over integer index domains.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    /// Ordered pure dimension names.
    pub args: Vec<String>,
    pub output_types: Vec<Type>,
    pub definition: Definition,
    /// Update definitions; stage indices 1..=N.
    pub updates: Vec<Definition>,
    pub extern_def: Option<ExternDefinition>,
}

impl Function {
    pub fn new(
        name: impl Into<String>,
        args: Vec<&str>,
        output_types: Vec<Type>,
        values: Vec<Expr>,
    ) -> Self {
        let args: Vec<String> = args.into_iter().map(String::from).collect();
        Function {
            name: name.into(),
            definition: Definition::pure(&args, values),
            args,
            output_types,
            updates: Vec::new(),
            extern_def: None,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.args.len()
    }

    pub fn outputs(&self) -> usize {
        self.output_types.len()
    }

    pub fn has_extern_definition(&self) -> bool {
        self.extern_def.is_some()
    }

    /// No update stages. (Extern functions are vacuously pure.)
    pub fn is_pure(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn can_be_inlined(&self) -> bool {
        !self.has_extern_definition() && self.is_pure() && self.outputs() == 1
    }

    /// Number of stages: initial definition plus updates.
    pub fn stage_count(&self) -> usize {
        1 + self.updates.len()
    }

    pub fn stage_definition(&self, stage: usize) -> &Definition {
        if stage == 0 {
            &self.definition
        } else {
            &self.updates[stage - 1]
        }
    }

    pub fn stage_definition_mut(&mut self, stage: usize) -> &mut Definition {
        if stage == 0 {
            &mut self.definition
        } else {
            &mut self.updates[stage - 1]
        }
    }

    /// The function-level schedule: the initial definition's.
    pub fn schedule(&self) -> &StageSchedule {
        &self.definition.schedule
    }

    pub fn store_level(&self) -> &LoopLevel {
        &self.definition.schedule.store_level
    }

    pub fn compute_level(&self) -> &LoopLevel {
        &self.definition.schedule.compute_level
    }

    pub fn memoized(&self) -> bool {
        self.definition.schedule.memoized
    }

    // ── Scheduling setters (front-end surface used by tests and demos) ──

    /// Append an update stage.
    pub fn add_update(&mut self, args: Vec<Expr>, values: Vec<Expr>) -> &mut Definition {
        self.updates
            .push(Definition::update(&self.args.clone(), args, values));
        self.updates.last_mut().unwrap()
    }

    /// Give this function an external implementation.
    pub fn define_extern(&mut self, name: impl Into<String>, args: Vec<ExternArgument>) {
        self.extern_def = Some(ExternDefinition {
            name: name.into(),
            args,
        });
        self.definition.values.clear();
    }

    pub fn compute_at(&mut self, level: LoopLevel) -> &mut Self {
        if self.definition.schedule.store_level.is_inline() {
            self.definition.schedule.store_level = level.clone();
        }
        self.definition.schedule.compute_level = level;
        self.definition.schedule.touched = true;
        self
    }

    pub fn compute_root(&mut self) -> &mut Self {
        self.compute_at(LoopLevel::Root)
    }

    pub fn compute_inline(&mut self) -> &mut Self {
        self.definition.schedule.compute_level = LoopLevel::Inline;
        self.definition.schedule.store_level = LoopLevel::Inline;
        self.definition.schedule.touched = true;
        self
    }

    pub fn store_at(&mut self, level: LoopLevel) -> &mut Self {
        self.definition.schedule.store_level = level;
        self.definition.schedule.touched = true;
        self
    }

    pub fn store_root(&mut self) -> &mut Self {
        self.store_at(LoopLevel::Root)
    }

    /// Declare an explicit bound on a pure dimension.
    pub fn bound(&mut self, dim: &str, min: Expr, extent: Expr) -> &mut Self {
        self.definition.schedule.bounds.push(Bound {
            var: dim.to_string(),
            min: Some(min),
            extent: Some(extent),
            modulus: None,
        });
        self
    }

    /// Declare a reduction variable on a stage.
    pub fn add_rvar(&mut self, stage: usize, rvar: &str, min: Expr, extent: Expr) {
        let def = self.stage_definition_mut(stage);
        def.schedule.rvars.push(ReductionVariable {
            var: rvar.to_string(),
            min,
            extent,
        });
        // A reduction var is also a loop dim, placed innermost.
        def.schedule
            .dims
            .insert(0, crate::schedule::Dim::serial(rvar));
    }

    /// Fuse this function's `stage` into `parent_func.s<parent_stage>` at
    /// `var`: this stage's loops from `var` upward merge with the parent's.
    /// The parent side is recorded with [`Function::add_fused_child`].
    pub fn compute_with(&mut self, stage: usize, parent_func: &str, var: &str) {
        let def = self.stage_definition_mut(stage);
        def.schedule.fuse_level = LoopLevel::at(parent_func, var);
        def.schedule.touched = true;
    }

    /// Record that `child_func.s<child_stage>` is fused into this
    /// function's `stage` at `var`.
    pub fn add_fused_child(&mut self, stage: usize, child_func: &str, child_stage: usize, var: &str) {
        let name = self.name.clone();
        let def = self.stage_definition_mut(stage);
        def.schedule.fused_pairs.push(FusedPair {
            func_1: name,
            stage_1: stage,
            func_2: child_func.to_string(),
            stage_2: child_stage,
            var_name: var.to_string(),
        });
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
