// schedule.rs — Per-stage schedule description
//
// The user-authored schedule of one definition stage: its loop dims
// (innermost first, always ending with the synthetic `__outermost`), the
// split/fuse/rename directives that produced them, explicit bounds,
// reduction variables, storage and compute placement, and loop-fusion
// directives (`compute_with`).
//
// Preconditions: produced by the front-end scheduling API; read-only here.
// Postconditions: none (data-only module).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ir::{DeviceApi, Expr, ForType};
use crate::names::{var_name_match, OUTERMOST};

// ── Loop levels ────────────────────────────────────────────────────────────

/// A location in the final loop tree: inline, the synthetic root, or a named
/// loop of some function's stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopLevel {
    Inline,
    Root,
    At { func: String, var: String },
}

impl LoopLevel {
    pub fn root() -> Self {
        LoopLevel::Root
    }

    pub fn at(func: impl Into<String>, var: impl Into<String>) -> Self {
        LoopLevel::At {
            func: func.into(),
            var: var.into(),
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, LoopLevel::Inline)
    }

    pub fn is_root(&self) -> bool {
        matches!(self, LoopLevel::Root)
    }

    /// True iff a loop named `loop_name` realizes this level.
    pub fn match_loop(&self, loop_name: &str) -> bool {
        match self {
            LoopLevel::Inline => false,
            LoopLevel::Root => loop_name == LoopLevel::Root.to_string(),
            LoopLevel::At { func, var } => {
                loop_name.starts_with(&format!("{}.", func))
                    && loop_name.ends_with(&format!(".{}", var))
            }
        }
    }

    /// Loop-level equivalence, tolerant of qualified var spellings.
    pub fn match_level(&self, other: &LoopLevel) -> bool {
        match (self, other) {
            (LoopLevel::Inline, LoopLevel::Inline) => true,
            (LoopLevel::Root, LoopLevel::Root) => true,
            (LoopLevel::At { func: f1, var: v1 }, LoopLevel::At { func: f2, var: v2 }) => {
                f1 == f2
                    && (v1 == v2
                        || v1.ends_with(&format!(".{}", v2))
                        || v2.ends_with(&format!(".{}", v1)))
            }
            _ => false,
        }
    }
}

impl fmt::Display for LoopLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopLevel::Inline => write!(f, "inline"),
            // The root loop's name: empty function part + synthetic var.
            LoopLevel::Root => write!(f, ".__root"),
            LoopLevel::At { func, var } => write!(f, "{}.{}", func, var),
        }
    }
}

// ── Dims, splits, bounds ───────────────────────────────────────────────────

/// One loop dimension of a stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Dim {
    pub var: String,
    pub for_type: ForType,
    pub device_api: DeviceApi,
}

impl Dim {
    pub fn serial(var: impl Into<String>) -> Self {
        Dim {
            var: var.into(),
            for_type: ForType::Serial,
            device_api: DeviceApi::None,
        }
    }
}

/// Policy for a split's ragged edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailStrategy {
    RoundUp,
    GuardWithIf,
    ShiftInwards,
    PredicateLoads,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitKind {
    /// `old → outer, inner` by `factor`.
    Split,
    /// `outer, inner → old` (old_var names the fused result).
    Fuse,
    /// `old → outer`.
    Rename,
    /// Reduction var promoted to a pure var (`old → outer`).
    Purify,
}

/// A schedule directive transforming named dims.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub old_var: String,
    pub outer: String,
    pub inner: String,
    pub factor: Expr,
    /// Splits of reduction vars must not visit points outside the domain.
    pub exact: bool,
    pub kind: SplitKind,
    pub tail: TailStrategy,
}

impl Split {
    pub fn is_split(&self) -> bool {
        self.kind == SplitKind::Split
    }

    pub fn is_fuse(&self) -> bool {
        self.kind == SplitKind::Fuse
    }

    pub fn is_rename(&self) -> bool {
        self.kind == SplitKind::Rename
    }
}

/// An explicit user bound on a dimension: min and/or extent, or an
/// alignment-only modulus.
#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    pub var: String,
    pub min: Option<Expr>,
    pub extent: Option<Expr>,
    pub modulus: Option<Expr>,
}

/// A reduction variable with its domain.
#[derive(Debug, Clone, PartialEq)]
pub struct ReductionVariable {
    pub var: String,
    pub min: Expr,
    pub extent: Expr,
}

/// Directive that `func_2.s<stage_2>` is fused into `func_1.s<stage_1>`:
/// their loops from `var_name` upward (outward) merge.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedPair {
    pub func_1: String,
    pub stage_1: usize,
    pub func_2: String,
    pub stage_2: usize,
    pub var_name: String,
}

// ── Stage schedule ─────────────────────────────────────────────────────────

/// The schedule of one definition stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSchedule {
    /// Loop dims, innermost first; always ends with `__outermost`.
    pub dims: Vec<Dim>,
    pub splits: Vec<Split>,
    pub bounds: Vec<Bound>,
    pub rvars: Vec<ReductionVariable>,
    pub store_level: LoopLevel,
    pub compute_level: LoopLevel,
    /// If not inline, this stage is fused into another stage at a var of
    /// that stage's loop nest.
    pub fuse_level: LoopLevel,
    /// Stages fused into this one.
    pub fused_pairs: Vec<FusedPair>,
    /// Whether the user scheduled this stage.
    pub touched: bool,
    pub memoized: bool,
}

impl StageSchedule {
    /// The default schedule over `pure_args`: one serial dim per arg plus
    /// the synthetic `__outermost`, everything inline and untouched.
    pub fn for_args(pure_args: &[String]) -> Self {
        let mut dims: Vec<Dim> = pure_args.iter().map(Dim::serial).collect();
        dims.push(Dim::serial(OUTERMOST));
        StageSchedule {
            dims,
            splits: Vec::new(),
            bounds: Vec::new(),
            rvars: Vec::new(),
            store_level: LoopLevel::Inline,
            compute_level: LoopLevel::Inline,
            fuse_level: LoopLevel::Inline,
            fused_pairs: Vec::new(),
            touched: false,
            memoized: false,
        }
    }

    /// Index of the dim matching `var` (unqualified), if any.
    pub fn dim_index(&self, var: &str) -> Option<usize> {
        self.dims.iter().position(|d| var_name_match(&d.var, var))
    }

    /// Split `old` into `outer` (outside) and `inner` (inside) by `factor`.
    /// Rewrites the dim list in place and records the directive.
    pub fn split(
        &mut self,
        old: &str,
        outer: &str,
        inner: &str,
        factor: Expr,
        tail: TailStrategy,
    ) {
        let idx = self
            .dim_index(old)
            .unwrap_or_else(|| panic!("split: no dim named {:?}", old));
        let exact = self.rvars.iter().any(|rv| rv.var == old);
        let old_dim = self.dims[idx].clone();
        self.dims.splice(
            idx..=idx,
            [
                Dim {
                    var: inner.to_string(),
                    ..old_dim.clone()
                },
                Dim {
                    var: outer.to_string(),
                    ..old_dim
                },
            ],
        );
        self.splits.push(Split {
            old_var: old.to_string(),
            outer: outer.to_string(),
            inner: inner.to_string(),
            factor,
            exact,
            kind: SplitKind::Split,
            tail,
        });
        self.touched = true;
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Expr;

    #[test]
    fn default_schedule_ends_with_outermost() {
        let s = StageSchedule::for_args(&["x".into(), "y".into()]);
        assert_eq!(s.dims.len(), 3);
        assert_eq!(s.dims.last().unwrap().var, OUTERMOST);
        assert!(s.compute_level.is_inline());
    }

    #[test]
    fn split_rewrites_dims_innermost_first() {
        let mut s = StageSchedule::for_args(&["x".into()]);
        s.split("x", "xo", "xi", Expr::Int(8), TailStrategy::GuardWithIf);
        let vars: Vec<_> = s.dims.iter().map(|d| d.var.as_str()).collect();
        assert_eq!(vars, ["xi", "xo", OUTERMOST]);
        assert_eq!(s.splits.len(), 1);
        assert!(s.touched);
    }

    #[test]
    fn loop_level_matching() {
        let at = LoopLevel::at("f", "y");
        assert!(at.match_loop("f.s0.y"));
        assert!(!at.match_loop("f.s0.yi"));
        assert!(!at.match_loop("g.s0.y"));
        assert!(LoopLevel::Root.match_loop(".__root"));
        assert!(!LoopLevel::Inline.match_loop("f.s0.y"));

        // Qualified-vs-unqualified var spellings still match.
        assert!(at.match_level(&LoopLevel::at("f", "s0.y")));
        assert!(!at.match_level(&LoopLevel::at("g", "y")));
    }
}
