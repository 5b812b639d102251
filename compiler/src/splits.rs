// splits.rs — Applying split/fuse/rename directives to a stage
//
// Turns a schedule's split list into three things the loop-nest builder
// weaves into the statement: substitutions rewriting old dims in terms of
// new loop vars, let-bindings for derived quantities, and predicates
// required for correctness under the chosen tail strategy. Also relates the
// new loop vars' bounds to their parents' bounds.
//
// Preconditions: every split's tail strategy is explicit (the front-end has
//   resolved any default); dims named by splits exist.
// Postconditions: applying the substitutions and guards visits exactly the
//   points of the old domain (exact splits) or a superset (RoundUp).
// Failure modes: panics on a non-positive split factor (front-end bug).
// Side effects: extends the caller's dim-alignment map.

use std::collections::HashMap;

use crate::ir::{add, div, le, likely, min, mul, rem, sub, var, Expr};
use crate::schedule::{Split, SplitKind, TailStrategy};
use crate::simplify::is_const;

/// Everything a split list contributes to one stage's loop nest.
#[derive(Debug, Default)]
pub struct ApplySplitsResult {
    /// `old var name → rewritten expression in new vars`, applied in order.
    pub substitutions: Vec<(String, Expr)>,
    /// Let-bindings introducing derived variables (split bases).
    pub let_stmts: Vec<(String, Expr)>,
    /// Guards required by tail strategies that do not round cleanly.
    pub predicates: Vec<Expr>,
}

/// Apply the split list of one stage.
///
/// `dim_extent_alignment` maps dims to extents (or moduli) known at
/// schedule time; a split whose factor divides its dim's known extent needs
/// no tail handling. Updated as splits introduce new dims.
pub fn apply_splits(
    splits: &[Split],
    is_update: bool,
    prefix: &str,
    dim_extent_alignment: &mut HashMap<String, Expr>,
) -> ApplySplitsResult {
    let mut result = ApplySplitsResult::default();

    for split in splits {
        match split.kind {
            SplitKind::Split => apply_one_split(split, is_update, prefix, dim_extent_alignment, &mut result),
            SplitKind::Fuse => {
                let fused = var(format!("{}{}", prefix, split.old_var));
                let inner_min = var(format!("{}{}.loop_min", prefix, split.inner));
                let outer_min = var(format!("{}{}.loop_min", prefix, split.outer));
                let inner_extent = var(format!("{}{}.loop_extent", prefix, split.inner));
                result.substitutions.push((
                    format!("{}{}", prefix, split.inner),
                    add(rem(fused.clone(), inner_extent.clone()), inner_min),
                ));
                result.substitutions.push((
                    format!("{}{}", prefix, split.outer),
                    add(div(fused, inner_extent), outer_min),
                ));
                if let (Some(i), Some(o)) = (
                    dim_extent_alignment.get(&split.inner).and_then(is_const),
                    dim_extent_alignment.get(&split.outer).and_then(is_const),
                ) {
                    dim_extent_alignment.insert(split.old_var.clone(), Expr::Int(i * o));
                }
            }
            SplitKind::Rename | SplitKind::Purify => {
                result.substitutions.push((
                    format!("{}{}", prefix, split.old_var),
                    var(format!("{}{}", prefix, split.outer)),
                ));
                if let Some(known) = dim_extent_alignment.get(&split.old_var).cloned() {
                    dim_extent_alignment.insert(split.outer.clone(), known);
                }
            }
        }
    }

    result
}

fn apply_one_split(
    split: &Split,
    is_update: bool,
    prefix: &str,
    dim_extent_alignment: &mut HashMap<String, Expr>,
    result: &mut ApplySplitsResult,
) {
    let factor = is_const(&split.factor);
    if let Some(f) = factor {
        assert!(f > 0, "split factor of {} must be positive", split.old_var);
    }

    let outer = var(format!("{}{}", prefix, split.outer));
    let inner = var(format!("{}{}", prefix, split.inner));
    let old_min = var(format!("{}{}.loop_min", prefix, split.old_var));
    let old_max = var(format!("{}{}.loop_max", prefix, split.old_var));
    let old_name = format!("{}{}", prefix, split.old_var);

    // The inner loop's extent is the factor by construction.
    dim_extent_alignment.insert(split.inner.clone(), split.factor.clone());

    let mut base = add(mul(outer, split.factor.clone()), old_min);

    let divides = match (
        dim_extent_alignment.get(&split.old_var).and_then(is_const),
        factor,
    ) {
        (Some(known), Some(f)) => known % f == 0,
        _ => false,
    };

    // Splits of reduction vars must visit exactly the domain; so must any
    // split in an update stage, which would otherwise re-apply the update
    // at recomputed points.
    let must_be_exact = split.exact || is_update;

    if divides {
        // The factor divides the known extent; the tail is empty.
    } else if must_be_exact || split.tail == TailStrategy::GuardWithIf
        || split.tail == TailStrategy::PredicateLoads
    {
        // Bind the base so the guard and the substitution agree on it.
        let base_name = format!("{}{}.base", prefix, split.inner);
        result.let_stmts.push((base_name.clone(), base));
        base = var(base_name);
        result
            .predicates
            .push(likely(le(add(base.clone(), inner.clone()), old_max)));
    } else if split.tail == TailStrategy::ShiftInwards {
        // Pull the last slice inward so it stays in bounds; recomputation
        // is fine for a pure initial definition.
        base = min(
            likely(base),
            add(old_max, sub(Expr::Int(1), split.factor.clone())),
        );
    } else {
        assert_eq!(split.tail, TailStrategy::RoundUp);
    }

    result.substitutions.push((old_name, add(base, inner)));
}

/// Let-bindings relating a split's new loop bounds to its parent's bounds.
/// Applied outermost-to-innermost by the loop-nest builder.
pub fn compute_loop_bounds_after_split(split: &Split, prefix: &str) -> Vec<(String, Expr)> {
    let old_min = var(format!("{}{}.loop_min", prefix, split.old_var));
    let old_max = var(format!("{}{}.loop_max", prefix, split.old_var));
    let old_extent = var(format!("{}{}.loop_extent", prefix, split.old_var));

    let mut lets = Vec::new();
    match split.kind {
        SplitKind::Split => {
            let inner_extent = split.factor.clone();
            let outer_extent = div(
                add(sub(old_max, old_min), split.factor.clone()),
                split.factor.clone(),
            );
            lets.push((format!("{}{}.loop_min", prefix, split.inner), Expr::Int(0)));
            lets.push((
                format!("{}{}.loop_max", prefix, split.inner),
                sub(split.factor.clone(), Expr::Int(1)),
            ));
            lets.push((
                format!("{}{}.loop_extent", prefix, split.inner),
                inner_extent,
            ));
            lets.push((format!("{}{}.loop_min", prefix, split.outer), Expr::Int(0)));
            lets.push((
                format!("{}{}.loop_max", prefix, split.outer),
                sub(outer_extent.clone(), Expr::Int(1)),
            ));
            lets.push((
                format!("{}{}.loop_extent", prefix, split.outer),
                outer_extent,
            ));
        }
        SplitKind::Fuse => {
            let fused_extent = mul(
                var(format!("{}{}.loop_extent", prefix, split.inner)),
                var(format!("{}{}.loop_extent", prefix, split.outer)),
            );
            lets.push((format!("{}{}.loop_min", prefix, split.old_var), Expr::Int(0)));
            lets.push((
                format!("{}{}.loop_max", prefix, split.old_var),
                sub(fused_extent.clone(), Expr::Int(1)),
            ));
            lets.push((
                format!("{}{}.loop_extent", prefix, split.old_var),
                fused_extent,
            ));
        }
        SplitKind::Rename => {
            lets.push((format!("{}{}.loop_min", prefix, split.outer), old_min));
            lets.push((format!("{}{}.loop_max", prefix, split.outer), old_max));
            lets.push((format!("{}{}.loop_extent", prefix, split.outer), old_extent));
        }
        // Purify takes its bounds from the dims directly.
        SplitKind::Purify => {}
    }
    lets
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn split(tail: TailStrategy) -> Split {
        Split {
            old_var: "x".into(),
            outer: "xo".into(),
            inner: "xi".into(),
            factor: Expr::Int(8),
            exact: false,
            kind: SplitKind::Split,
            tail,
        }
    }

    #[test]
    fn guard_with_if_binds_base_and_guards() {
        let mut align = HashMap::new();
        let r = apply_splits(&[split(TailStrategy::GuardWithIf)], false, "f.s0.", &mut align);
        assert_eq!(r.let_stmts.len(), 1);
        assert_eq!(r.let_stmts[0].0, "f.s0.xi.base");
        assert_eq!(r.predicates.len(), 1);
        assert_eq!(r.substitutions.len(), 1);
        assert_eq!(r.substitutions[0].0, "f.s0.x");
        // The inner extent is now known to be the factor.
        assert_eq!(align.get("xi"), Some(&Expr::Int(8)));
    }

    #[test]
    fn round_up_needs_no_guard() {
        let mut align = HashMap::new();
        let r = apply_splits(&[split(TailStrategy::RoundUp)], false, "f.s0.", &mut align);
        assert!(r.let_stmts.is_empty());
        assert!(r.predicates.is_empty());
        // old var rewritten as outer*factor + min + inner
        let (name, e) = &r.substitutions[0];
        assert_eq!(name, "f.s0.x");
        assert_eq!(
            *e,
            add(
                add(
                    mul(var("f.s0.xo"), Expr::Int(8)),
                    var("f.s0.x.loop_min")
                ),
                var("f.s0.xi")
            )
        );
    }

    #[test]
    fn known_divisible_extent_skips_tail() {
        let mut align = HashMap::new();
        align.insert("x".to_string(), Expr::Int(64));
        let r = apply_splits(&[split(TailStrategy::GuardWithIf)], false, "f.s0.", &mut align);
        assert!(r.predicates.is_empty());
        assert!(r.let_stmts.is_empty());
    }

    #[test]
    fn update_stage_forces_exact_iteration() {
        let mut align = HashMap::new();
        let r = apply_splits(&[split(TailStrategy::RoundUp)], true, "f.s0.", &mut align);
        assert_eq!(r.predicates.len(), 1);
    }

    #[test]
    fn split_bounds_cover_inner_and_outer() {
        let lets = compute_loop_bounds_after_split(&split(TailStrategy::RoundUp), "f.s0.");
        let names: Vec<&str> = lets.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            [
                "f.s0.xi.loop_min",
                "f.s0.xi.loop_max",
                "f.s0.xi.loop_extent",
                "f.s0.xo.loop_min",
                "f.s0.xo.loop_max",
                "f.s0.xo.loop_extent",
            ]
        );
    }

    #[test]
    fn fuse_substitutes_div_mod() {
        let f = Split {
            old_var: "t".into(),
            outer: "y".into(),
            inner: "x".into(),
            factor: Expr::Int(0),
            exact: false,
            kind: SplitKind::Fuse,
            tail: TailStrategy::RoundUp,
        };
        let mut align = HashMap::new();
        let r = apply_splits(&[f], false, "f.s0.", &mut align);
        assert_eq!(r.substitutions.len(), 2);
        assert_eq!(r.substitutions[0].0, "f.s0.x");
        assert_eq!(r.substitutions[1].0, "f.s0.y");
    }
}
