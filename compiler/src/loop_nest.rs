// loop_nest.rs — Building the loop nest that computes one definition
//
// From inside out: seed a `Provide`, guard fused dims, apply splits, then
// wrap dims, split lets, and predicates as containers — hoisting lets (and
// hoistable predicates) as far outward as their free variables allow —
// and finally emit the bound bindings every loop reads.
//
// Preconditions: `def`'s schedule is validated; dims end with `__outermost`.
// Postconditions: the returned statement computes `def` over the symbolic
//   bounds `<prefix><dim>.min`/`.max` supplied later by bounds inference.
// Failure modes: panics on internal invariant violations.
// Side effects: none.

use std::collections::HashMap;

use log::trace;

use crate::func::Definition;
use crate::ir::{
    add, for_loop, if_then, if_then_else, le, let_stmt, likely, sub, var, Expr, Stmt,
};
use crate::names::OUTERMOST;
use crate::splits::{apply_splits, compute_loop_bounds_after_split};
use crate::subst::{contains_impure_call, expr_uses_var, qualify, substitute};

// A containing LetStmt, IfThenElse, or For in the nest being built.
// Outermost first once assembled.
enum Container {
    For { dim_idx: usize, name: String },
    Let { name: String, value: Expr },
    If { predicate: Expr },
}

impl Container {
    fn name(&self) -> &str {
        match self {
            Container::For { name, .. } | Container::Let { name, .. } => name,
            Container::If { .. } => "",
        }
    }

    fn value(&self) -> &Expr {
        match self {
            Container::Let { value, .. } => value,
            Container::If { predicate } => predicate,
            Container::For { .. } => panic!("for-container has no value"),
        }
    }
}

/// Build the statement computing one definition (or one specialization
/// branch of it) as a loop nest around a `Provide`.
///
/// `start_fuse`, when present, is the innermost dim index fused with a
/// parent stage; dims from it outward get range guards because the parent
/// loop's bounds may be a union over fused siblings.
pub fn build_provide_loop_nest(
    func_name: &str,
    prefix: &str,
    start_fuse: Option<usize>,
    dims: &[String],
    def: &Definition,
    is_update: bool,
) -> Stmt {
    let mut stmt = build_loop_nest_helper(func_name, prefix, start_fuse, dims, def, is_update);

    // Chain specializations from last to first so that specialization 0 is
    // the outermost test, i.e. tested first at runtime.
    for spec in def.specializations.iter().rev() {
        let then_case = build_provide_loop_nest(
            func_name,
            prefix,
            start_fuse,
            dims,
            &spec.definition,
            is_update,
        );
        stmt = if_then_else(spec.condition.clone(), then_case, stmt);
    }

    stmt
}

fn build_loop_nest_helper(
    func_name: &str,
    prefix: &str,
    start_fuse: Option<usize>,
    dims: &[String],
    def: &Definition,
    is_update: bool,
) -> Stmt {
    let s = &def.schedule;

    // The (multi-dimensional, multi-valued) store node, sites and values
    // rewritten into this stage's namespace.
    let site: Vec<Expr> = def
        .args
        .iter()
        .map(|e| qualify(prefix, e.clone()))
        .collect();
    let values: Vec<Expr> = def
        .values
        .iter()
        .map(|e| qualify(prefix, e.clone()))
        .collect();
    for (i, v) in values.iter().enumerate() {
        trace!("value {} = {}", i, v);
    }
    let mut stmt = Stmt::Provide {
        name: func_name.to_string(),
        values,
        site,
    };

    // Guard the fused dims so a unioned parent loop cannot write out of
    // this stage's own range. The __outermost dim is stripped later and
    // needs none.
    if let Some(first) = start_fuse {
        for dim in s.dims.iter().take(s.dims.len().saturating_sub(1)).skip(first) {
            let v = var(format!("{}{}", prefix, dim.var));
            let lo = var(format!("{}{}.loop_min", prefix, dim.var));
            let hi = var(format!("{}{}.loop_max", prefix, dim.var));
            stmt = if_then(likely(le(lo, v.clone())), stmt);
            stmt = if_then(likely(le(v, hi)), stmt);
        }
    }

    // Dims whose extent is known to be (a multiple of) some expression:
    // explicit bounds, alignment moduli, and reduction domains.
    let mut dim_extent_alignment: HashMap<String, Expr> = HashMap::new();
    for b in &s.bounds {
        if let Some(e) = &b.extent {
            dim_extent_alignment.insert(b.var.clone(), e.clone());
        }
        if let Some(m) = &b.modulus {
            dim_extent_alignment.insert(b.var.clone(), m.clone());
        }
    }
    for rv in &s.rvars {
        dim_extent_alignment.insert(rv.var.clone(), rv.extent.clone());
    }

    // Define the function args in terms of the loop variables.
    let splits_result = apply_splits(&s.splits, is_update, prefix, &mut dim_extent_alignment);
    for (name, value) in &splits_result.substitutions {
        stmt = substitute(name, value, stmt);
    }

    // All containing lets, fors, and guards; outermost first.
    let mut nest: Vec<Container> = Vec::new();

    for (i, dim) in s.dims.iter().enumerate().rev() {
        nest.push(Container::For {
            dim_idx: i,
            name: format!("{}{}", prefix, dim.var),
        });
    }
    let dims_count = s.dims.len();

    for (name, value) in splits_result.let_stmts.iter().rev() {
        nest.push(Container::Let {
            name: name.clone(),
            value: value.clone(),
        });
    }

    // Strip lets already on the statement into the container list.
    while let Stmt::Let { name, value, body } = stmt {
        nest.push(Container::Let { name, value });
        stmt = *body;
    }

    // Split predicates, then the stage's own predicates (qualified).
    let n_predicates = splits_result.predicates.len() + def.split_predicate.len();
    for p in &splits_result.predicates {
        nest.push(Container::If {
            predicate: p.clone(),
        });
    }
    for p in &def.split_predicate {
        nest.push(Container::If {
            predicate: likely(qualify(prefix, p.clone())),
        });
    }

    // Push lets as far outward as possible: reverse insertion sort starting
    // at the first let container.
    let lets_end = nest.len() - n_predicates;
    for i in dims_count..lets_end {
        debug_assert!(matches!(nest[i], Container::Let { .. }));
        for j in (0..i).rev() {
            if !expr_uses_var(nest[j + 1].value(), nest[j].name()) {
                nest.swap(j, j + 1);
            } else {
                break;
            }
        }
    }

    // Same for the predicate guards — except that a predicate containing an
    // impure call must not move over the loops it observes.
    for i in lets_end..nest.len() {
        debug_assert!(matches!(nest[i], Container::If { .. }));
        if contains_impure_call(nest[i].value()) {
            continue;
        }
        for j in (0..i).rev() {
            if !expr_uses_var(nest[j + 1].value(), nest[j].name()) {
                nest.swap(j, j + 1);
            } else {
                break;
            }
        }
    }

    // Rewrap the statement in the containers, innermost last.
    for c in nest.into_iter().rev() {
        match c {
            Container::Let { name, value } => stmt = let_stmt(name, value, stmt),
            Container::If { predicate } => stmt = if_then(predicate, stmt),
            Container::For { dim_idx, name } => {
                let dim = &s.dims[dim_idx];
                stmt = for_loop(
                    name.clone(),
                    var(format!("{}.loop_min", name)),
                    var(format!("{}.loop_extent", name)),
                    dim.for_type,
                    dim.device_api,
                    stmt,
                );
            }
        }
    }

    // Define the bounds on the split dimensions in terms of their parents'.
    for split in s.splits.iter().rev() {
        for (name, value) in compute_loop_bounds_after_split(split, prefix) {
            stmt = let_stmt(name, value, stmt);
        }
    }

    // The synthetic outermost dim iterates exactly once.
    let o = format!("{}{}", prefix, OUTERMOST);
    stmt = let_stmt(format!("{}.loop_min", o), Expr::Int(0), stmt);
    stmt = let_stmt(format!("{}.loop_max", o), Expr::Int(0), stmt);
    stmt = let_stmt(format!("{}.loop_extent", o), Expr::Int(1), stmt);

    // Loop bounds of the pure dims, in terms of the mins and maxes that
    // bounds inference will supply.
    for d in dims {
        let v = format!("{}{}", prefix, d);
        let lo = var(format!("{}.min", v));
        let hi = var(format!("{}.max", v));
        stmt = let_stmt(
            format!("{}.loop_extent", v),
            sub(add(hi.clone(), Expr::Int(1)), lo.clone()),
            stmt,
        );
        stmt = let_stmt(format!("{}.loop_min", v), lo, stmt);
        stmt = let_stmt(format!("{}.loop_max", v), hi, stmt);
    }

    // And of the reduction domain, if there is one.
    for rv in &s.rvars {
        let p = format!("{}{}", prefix, rv.var);
        let lo = var(format!("{}.min", p));
        let hi = var(format!("{}.max", p));
        stmt = let_stmt(format!("{}.loop_min", p), lo.clone(), stmt);
        stmt = let_stmt(format!("{}.loop_max", p), hi.clone(), stmt);
        stmt = let_stmt(
            format!("{}.loop_extent", p),
            add(sub(hi, lo), Expr::Int(1)),
            stmt,
        );
    }

    stmt
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::{Function, Specialization};
    use crate::ir::{eq, mul, Type};
    use crate::schedule::TailStrategy;

    fn count_loops(s: &Stmt) -> Vec<String> {
        let mut out = Vec::new();
        fn walk(s: &Stmt, out: &mut Vec<String>) {
            match s {
                Stmt::For { name, body, .. } => {
                    out.push(name.clone());
                    walk(body, out);
                }
                Stmt::Let { body, .. } | Stmt::ProducerConsumer { body, .. } => walk(body, out),
                Stmt::IfThenElse {
                    then_case,
                    else_case,
                    ..
                } => {
                    walk(then_case, out);
                    if let Some(e) = else_case {
                        walk(e, out);
                    }
                }
                Stmt::Block { first, rest } => {
                    walk(first, out);
                    walk(rest, out);
                }
                Stmt::Realize { body, .. } => walk(body, out),
                _ => {}
            }
        }
        walk(s, &mut out);
        out
    }

    fn f_xy() -> Function {
        Function::new(
            "f",
            vec!["x", "y"],
            vec![Type::Int32],
            vec![add(var("x"), var("y"))],
        )
    }

    #[test]
    fn pure_nest_is_outer_y_inner_x() {
        let f = f_xy();
        let s = build_provide_loop_nest("f", "f.s0.", None, &f.args, &f.definition, false);
        let loops = count_loops(&s);
        // Outermost-first traversal: __outermost, then y, then x.
        assert_eq!(loops, ["f.s0.__outermost", "f.s0.y", "f.s0.x"]);
    }

    #[test]
    fn provide_site_is_qualified() {
        let f = f_xy();
        let s = build_provide_loop_nest("f", "f.s0.", None, &f.args, &f.definition, false);
        let text = format!("{}", s);
        assert!(text.contains("f(f.s0.x, f.s0.y) = (f.s0.x + f.s0.y)"));
    }

    #[test]
    fn guarded_split_produces_if_and_base_let() {
        let mut f = f_xy();
        f.definition
            .schedule
            .split("x", "xo", "xi", Expr::Int(8), TailStrategy::GuardWithIf);
        let s = build_provide_loop_nest("f", "f.s0.", None, &f.args, &f.definition, false);
        let loops = count_loops(&s);
        assert_eq!(loops, ["f.s0.__outermost", "f.s0.y", "f.s0.xo", "f.s0.xi"]);
        let text = format!("{}", s);
        assert!(text.contains("let f.s0.xi.base"));
        assert!(text.contains("likely(((f.s0.xi.base + f.s0.xi) <= f.s0.x.loop_max))"));
        // Bound lets for both new loops exist.
        assert!(text.contains("let f.s0.xo.loop_extent"));
        assert!(text.contains("let f.s0.xi.loop_extent"));
    }

    #[test]
    fn specialization_zero_is_tested_first() {
        let mut f = f_xy();
        let mut alt = f.definition.clone();
        alt.values = vec![Expr::Int(0)];
        f.definition.specializations.push(Specialization {
            condition: eq(var("cond_a"), Expr::Int(1)),
            definition: alt.clone(),
        });
        alt.values = vec![mul(var("x"), Expr::Int(2))];
        f.definition.specializations.push(Specialization {
            condition: eq(var("cond_b"), Expr::Int(1)),
            definition: alt,
        });
        let s = build_provide_loop_nest("f", "f.s0.", None, &f.args, &f.definition, false);
        // Outermost IfThenElse must test specialization 0 (cond_a); its else
        // branch tests cond_b; the innermost fallthrough is the base.
        match s {
            Stmt::IfThenElse {
                condition,
                else_case,
                ..
            } => {
                assert_eq!(condition, eq(var("cond_a"), Expr::Int(1)));
                match else_case.as_deref() {
                    Some(Stmt::IfThenElse { condition, .. }) => {
                        assert_eq!(*condition, eq(var("cond_b"), Expr::Int(1)));
                    }
                    other => panic!("expected nested specialization, got {:?}", other),
                }
            }
            other => panic!("expected IfThenElse chain, got {:?}", other),
        }
    }

    #[test]
    fn fused_dims_get_range_guards() {
        let f = f_xy();
        // Fusing from dim 0 (x) guards x and y but not __outermost.
        let s = build_provide_loop_nest("f", "f.s0.", Some(0), &f.args, &f.definition, false);
        let text = format!("{}", s);
        assert!(text.contains("likely((f.s0.x.loop_min <= f.s0.x))"));
        assert!(text.contains("likely((f.s0.x <= f.s0.x.loop_max))"));
        assert!(text.contains("likely((f.s0.y.loop_min <= f.s0.y))"));
        assert!(!text.contains("__outermost.loop_min <= "));
    }

    #[test]
    fn rvar_bounds_are_emitted() {
        let mut f = f_xy();
        f.add_update(vec![var("x"), var("y")], vec![Expr::Int(1)]);
        f.add_rvar(1, "r", Expr::Int(0), Expr::Int(4));
        let s = build_provide_loop_nest(
            "f",
            "f.s1.",
            None,
            &f.args.clone(),
            f.stage_definition(1),
            true,
        );
        let text = format!("{}", s);
        assert!(text.contains("let f.s1.r.loop_min = f.s1.r.min"));
        assert!(text.contains("let f.s1.r.loop_extent"));
        let loops = count_loops(&s);
        assert_eq!(
            loops,
            ["f.s1.__outermost", "f.s1.y", "f.s1.x", "f.s1.r"]
        );
    }
}
