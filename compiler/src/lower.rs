// lower.rs — Schedule lowering driver & verification
//
// Seeds a skeleton loop over the synthetic root, then walks the fused
// groups in reverse realization order, validating each member against the
// statement built so far and injecting it: inlined, alone, or as a fused
// group. Finally strips the root loop and every loop over the synthetic
// `__outermost` dim. Then verifies the C1-C4 proof obligations over the
// result.
//
// Preconditions: `env` holds every function `order`/`fused_groups` name;
//   `fused_groups` is in topological realization order.
// Postconditions: LowerResult with the statement tree and `any_memoized`,
//   or diagnostics and no statement; Cert evidence via `verify_lowering`.
// Failure modes: user errors produce diagnostics and `has_errors()`;
//   invariant violations panic.
// Side effects: none.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::diag::{has_errors, Diagnostic};
use crate::fuse::InjectGroupRealization;
use crate::func::Function;
use crate::inject::InjectRealization;
use crate::inline::inline_function;
use crate::ir::{for_loop, DeviceApi, Expr, ForType, Stmt};
use crate::schedule::LoopLevel;
use crate::simplify::{is_one, simplify};
use crate::subst::substitute;
use crate::target::Target;
use crate::validate::{validate_fused_groups, validate_schedule};
use crate::visit::{remake_stmt, walk_stmt, IrMutator, IrVisitor};

type Env = HashMap<String, Function>;

// ── Result and certificate ─────────────────────────────────────────────────

/// Result of schedule lowering.
pub struct LowerResult {
    /// The lowered statement tree; absent when validation failed.
    pub stmt: Option<Stmt>,
    /// Whether any scheduled function is memoized.
    pub any_memoized: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl LowerResult {
    pub fn has_errors(&self) -> bool {
        has_errors(&self.diagnostics)
    }
}

/// Machine-checkable evidence for the lowering postconditions (C1-C4).
#[derive(Debug, Clone)]
pub struct LowerCert {
    /// C1: every Provide has a dominating Realize (or targets an output).
    pub c1_realize_dominates_provide: bool,
    /// C2: every loop's `.loop_min`/`.loop_max`/`.loop_extent` bindings
    /// dominate the loop.
    pub c2_loop_bounds_bound: bool,
    /// C3: no `__outermost` loop or binding survives.
    pub c3_no_outermost_remains: bool,
    /// C4: every fused loop whose extent collapsed to 1 (the child side of
    /// each pair) is serial.
    pub c4_fused_children_collapsed: bool,
}

impl LowerCert {
    pub fn all_pass(&self) -> bool {
        self.c1_realize_dominates_provide
            && self.c2_loop_bounds_bound
            && self.c3_no_outermost_remains
            && self.c4_fused_children_collapsed
    }

    pub fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            (
                "C1_realize_dominates_provide",
                self.c1_realize_dominates_provide,
            ),
            ("C2_loop_bounds_bound", self.c2_loop_bounds_bound),
            ("C3_no_outermost_remains", self.c3_no_outermost_remains),
            (
                "C4_fused_children_collapsed",
                self.c4_fused_children_collapsed,
            ),
        ]
    }
}

// ── Driver ─────────────────────────────────────────────────────────────────

/// Lower every function's schedule into a single imperative statement.
///
/// `outputs` names the pipeline outputs (stored by the caller), `order` is
/// the topological order of all functions, and `fused_groups` partitions
/// `order` into compute_with groups, processed in reverse.
pub fn lower_schedules(
    outputs: &[String],
    order: &[String],
    fused_groups: &[Vec<String>],
    env: &Env,
    target: &Target,
) -> LowerResult {
    debug_assert!(fused_groups
        .iter()
        .flatten()
        .all(|n| order.contains(n) && env.contains_key(n)));

    let mut any_memoized = false;
    let mut diagnostics = validate_fused_groups(fused_groups, env);
    if has_errors(&diagnostics) {
        return LowerResult {
            stmt: None,
            any_memoized,
            diagnostics,
        };
    }

    let mut s = for_loop(
        LoopLevel::Root.to_string(),
        Expr::Int(0),
        Expr::Int(1),
        ForType::Serial,
        DeviceApi::Host,
        Stmt::Evaluate(Expr::Int(0)),
    );

    for group in fused_groups.iter().rev() {
        assert!(!group.is_empty());
        let funcs: Vec<Function> = group
            .iter()
            .map(|n| {
                env.get(n)
                    .unwrap_or_else(|| panic!("function {:?} not in environment", n))
                    .clone()
            })
            .collect();
        let is_output_list: Vec<bool> = funcs
            .iter()
            .map(|f| outputs.contains(&f.name))
            .collect();

        for (f, &is_output) in funcs.iter().zip(&is_output_list) {
            diagnostics.extend(validate_schedule(f, &s, target, is_output, env));
            any_memoized = any_memoized || f.memoized();
        }
        if has_errors(&diagnostics) {
            return LowerResult {
                stmt: None,
                any_memoized,
                diagnostics,
            };
        }

        let relevant_fused_pairs = funcs[0]
            .definition
            .schedule
            .fused_pairs
            .iter()
            .filter(|p| env.contains_key(&p.func_2))
            .count();

        if funcs.len() == 1 && relevant_fused_pairs == 0 {
            if funcs[0].can_be_inlined() && funcs[0].compute_level().is_inline() {
                debug!("inlining {}", funcs[0].name);
                s = inline_function(s, &funcs[0]);
            } else {
                debug!("injecting realization of {}", funcs[0].name);
                let mut injector =
                    InjectRealization::new(&funcs[0], is_output_list[0], target, env);
                s = injector.mutate_stmt(s);
                assert!(
                    injector.found_store_level && injector.found_compute_level,
                    "store or compute level of {} not found in the skeleton",
                    funcs[0].name
                );
            }
        } else {
            debug!(
                "injecting realization of fused group {:?}",
                group
            );
            let mut injector =
                InjectGroupRealization::new(&funcs, &is_output_list, target, env);
            s = injector.mutate_stmt(s);
            diagnostics.append(&mut injector.diagnostics);
            if has_errors(&diagnostics) {
                return LowerResult {
                    stmt: None,
                    any_memoized,
                    diagnostics,
                };
            }
            assert!(
                injector.found_store_level && injector.found_compute_level,
                "store or compute level of fused group {:?} not found",
                group
            );
        }
    }

    // The loop over root has served its purpose.
    let s = match s {
        Stmt::For { name, body, .. } => {
            assert_eq!(name, LoopLevel::Root.to_string());
            *body
        }
        other => panic!("skeleton root is not a loop: {:?}", other),
    };

    let s = RemoveOutermostLoops.mutate_stmt(s);

    LowerResult {
        stmt: Some(s),
        any_memoized,
        diagnostics,
    }
}

// ── __outermost stripping ──────────────────────────────────────────────────

/// Removes every loop over a `__outermost` dim (substituting its min for
/// the loop var) and every binding of a `__outermost` bound.
pub struct RemoveOutermostLoops;

impl IrMutator for RemoveOutermostLoops {
    fn mutate_stmt(&mut self, s: Stmt) -> Stmt {
        match s {
            Stmt::For {
                name,
                min,
                extent,
                device_api,
                body,
                ..
            } if name.ends_with(".__outermost")
                && is_one(&simplify(extent.clone()))
                && device_api == DeviceApi::None =>
            {
                self.mutate_stmt(substitute(&name, &min, *body))
            }
            Stmt::Let { name, value, body }
                if name.ends_with(".__outermost.loop_extent")
                    || name.ends_with(".__outermost.loop_min")
                    || name.ends_with(".__outermost.loop_max") =>
            {
                self.mutate_stmt(substitute(&name, &simplify(value), *body))
            }
            other => remake_stmt(self, other),
        }
    }
}

// ── Verification ───────────────────────────────────────────────────────────

/// Recompute the C1-C4 obligations over a lowered statement.
pub fn verify_lowering(stmt: &Stmt, outputs: &[String]) -> LowerCert {
    let mut v = Verifier {
        outputs,
        realized: Vec::new(),
        lets_in_scope: Vec::new(),
        c1: true,
        c2: true,
        c3: true,
        c4: true,
    };
    v.visit_stmt(stmt);
    LowerCert {
        c1_realize_dominates_provide: v.c1,
        c2_loop_bounds_bound: v.c2,
        c3_no_outermost_remains: v.c3,
        c4_fused_children_collapsed: v.c4,
    }
}

struct Verifier<'a> {
    outputs: &'a [String],
    realized: Vec<String>,
    lets_in_scope: Vec<(String, Expr)>,
    c1: bool,
    c2: bool,
    c3: bool,
    c4: bool,
}

impl Verifier<'_> {
    fn lookup(&self, name: &str) -> Option<&Expr> {
        self.lets_in_scope
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Resolve a bound expression through the lets in scope, bottoming out
    /// after a few hops.
    fn resolve(&self, e: &Expr) -> Expr {
        let mut e = e.clone();
        for _ in 0..8 {
            e = simplify(e);
            match &e {
                Expr::Var(n) => match self.lookup(n) {
                    Some(v) => e = v.clone(),
                    None => break,
                },
                _ => break,
            }
        }
        e
    }
}

impl IrVisitor for Verifier<'_> {
    fn visit_stmt(&mut self, s: &Stmt) {
        match s {
            Stmt::Provide { name, .. } => {
                if !self.realized.contains(name) && !self.outputs.contains(name) {
                    self.c1 = false;
                }
                walk_stmt(self, s);
            }
            Stmt::Realize { name, .. } => {
                self.realized.push(name.clone());
                walk_stmt(self, s);
                self.realized.pop();
            }
            Stmt::Let { name, value, body } => {
                if name.contains(".__outermost.") {
                    self.c3 = false;
                }
                self.lets_in_scope.push((name.clone(), value.clone()));
                self.visit_stmt(body);
                self.lets_in_scope.pop();
            }
            Stmt::For {
                name,
                extent,
                for_type,
                body,
                ..
            } => {
                if name.ends_with(".__outermost") {
                    self.c3 = false;
                }
                for suffix in [".loop_min", ".loop_max", ".loop_extent"] {
                    if self.lookup(&format!("{}{}", name, suffix)).is_none() {
                        self.c2 = false;
                    }
                }
                if name.contains(".fused.") {
                    let extent = self.resolve(extent);
                    if is_one(&extent) && *for_type != ForType::Serial {
                        self.c4 = false;
                    }
                }
                self.visit_stmt(body);
            }
            _ => walk_stmt(self, s),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{add, func_call, let_stmt, var, Type};

    fn env_of(funcs: Vec<Function>) -> Env {
        funcs.into_iter().map(|f| (f.name.clone(), f)).collect()
    }

    fn two_stage_env() -> Env {
        let mut f = Function::new("f", vec!["x"], vec![Type::Int32], vec![var("x")]);
        f.compute_root();
        let mut g = Function::new(
            "g",
            vec!["x"],
            vec![Type::Int32],
            vec![add(func_call("f", vec![var("x")], 0), Expr::Int(1))],
        );
        g.compute_root();
        env_of(vec![f, g])
    }

    fn lower_two_stage(env: &Env) -> LowerResult {
        lower_schedules(
            &["g".to_string()],
            &["f".to_string(), "g".to_string()],
            &[vec!["f".to_string()], vec!["g".to_string()]],
            env,
            &Target::host(),
        )
    }

    #[test]
    fn two_stage_pipeline_lowers_clean() {
        let env = two_stage_env();
        let result = lower_two_stage(&env);
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
        let stmt = result.stmt.unwrap();
        let cert = verify_lowering(&stmt, &["g".to_string()]);
        assert!(cert.all_pass(), "{:?}", cert.obligations());
        let text = format!("{}", stmt);
        assert!(text.contains("realize f"));
        assert!(text.contains("produce f"));
        assert!(text.contains("produce g"));
        assert!(!text.contains("__outermost"));
        assert!(!text.contains(".__root"));
    }

    #[test]
    fn memoized_flag_is_collected() {
        let mut env = two_stage_env();
        env.get_mut("f").unwrap().definition.schedule.memoized = true;
        let result = lower_two_stage(&env);
        assert!(result.any_memoized);
    }

    #[test]
    fn validation_errors_abort_lowering() {
        let mut env = two_stage_env();
        // Output not at root.
        env.get_mut("g").unwrap().definition.schedule.compute_level = LoopLevel::at("f", "x");
        let result = lower_two_stage(&env);
        assert!(result.has_errors());
        assert!(result.stmt.is_none());
    }

    #[test]
    fn outermost_stripper_is_idempotent() {
        let inner = Stmt::Provide {
            name: "f".into(),
            values: vec![var("f.s0.x")],
            site: vec![var("f.s0.x")],
        };
        let s = let_stmt(
            "f.s0.__outermost.loop_min",
            Expr::Int(0),
            let_stmt(
                "f.s0.__outermost.loop_extent",
                Expr::Int(1),
                for_loop(
                    "f.s0.__outermost",
                    var("f.s0.__outermost.loop_min"),
                    var("f.s0.__outermost.loop_extent"),
                    ForType::Serial,
                    DeviceApi::None,
                    inner,
                ),
            ),
        );
        let once = RemoveOutermostLoops.mutate_stmt(s);
        let twice = RemoveOutermostLoops.mutate_stmt(once.clone());
        assert_eq!(once, twice);
        assert!(!format!("{}", once).contains("__outermost"));
    }

    #[test]
    fn verifier_rejects_unrealized_provide() {
        let s = Stmt::Provide {
            name: "f".into(),
            values: vec![Expr::Int(0)],
            site: vec![var("x")],
        };
        let cert = verify_lowering(&s, &[]);
        assert!(!cert.c1_realize_dominates_provide);
        let cert = verify_lowering(&s, &["f".to_string()]);
        assert!(cert.c1_realize_dominates_provide);
    }
}
