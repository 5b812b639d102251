// validate.rs — Structural legality of a schedule
//
// Two entry points: `validate_schedule` checks one function's placement
// against the statement built so far (legal compute/store sites, race
// freedom between them, output and inline constraints, device support);
// `validate_fused_groups` checks every compute_with pair up front
// (participants not inline or extern, matching compute levels and dim
// prefixes, and — for a stage fused with its own function — identical
// split histories without ShiftInwards tails).
//
// Preconditions: `env` contains every function the schedules mention.
// Postconditions: returned diagnostics list every violation found; an
//   empty list means the schedule may be injected.
// Failure modes: none (user errors become diagnostics).
// Side effects: none.

use std::collections::HashMap;

use crate::diag::{codes, Diagnostic};
use crate::func::{Definition, ExternArgument, Function};
use crate::legality::{schedule_to_source, write_uses_of_func, ComputeLegalSchedules, Site};
use crate::names::var_name_match;
use crate::schedule::{Split, TailStrategy};
use crate::ir::Stmt;
use crate::target::Target;
use crate::visit::IrVisitor;

type Env = HashMap<String, Function>;

// ── Per-function validation ────────────────────────────────────────────────

/// Validate `f`'s placement against the current skeleton `s`.
pub fn validate_schedule(
    f: &Function,
    s: &Stmt,
    target: &Target,
    is_output: bool,
    env: &Env,
) -> Vec<Diagnostic> {
    let mut diags = Vec::new();

    // An extern stage reads its inputs through buffers; an inlined input
    // has no buffer to read.
    if let Some(extern_def) = &f.extern_def {
        for arg in &extern_def.args {
            if let ExternArgument::Func(name) = arg {
                if let Some(g) = env.get(name) {
                    if g.compute_level().is_inline() {
                        diags.push(
                            Diagnostic::error(format!(
                                "{} cannot be scheduled inline: it is used by the \
                                 externally-computed function {}",
                                g.name, f.name
                            ))
                            .with_code(codes::E0502)
                            .with_func(g.name.clone()),
                        );
                    }
                }
            }
        }
    }

    // Warn when only some of the stages were scheduled.
    let any_scheduled = f.schedule().touched
        || f.updates.iter().any(|u| u.schedule.touched);
    if any_scheduled {
        for (i, u) in f.updates.iter().enumerate() {
            if !u.schedule.touched {
                diags.push(
                    Diagnostic::warning(format!(
                        "update stage {} of function {} has not been scheduled, \
                         even though other stages have been",
                        i, f.name
                    ))
                    .with_code(codes::W0500)
                    .with_func(f.name.clone())
                    .with_hint(format!(
                        "call {}.update({}) to suppress this warning if intentional",
                        f.name, i
                    )),
                );
            }
        }
    }

    // Device APIs named anywhere in the schedule (specializations
    // included) must be supported by the target.
    for def in all_definitions(f) {
        for d in &def.schedule.dims {
            if !target.supports_device_api(d.device_api) {
                diags.push(
                    Diagnostic::error(format!(
                        "schedule for {} requires device api {} but the target does \
                         not enable it",
                        f.name, d.device_api
                    ))
                    .with_code(codes::E0510)
                    .with_func(f.name.clone()),
                );
            }
        }
    }

    let store_at = f.store_level();
    let compute_at = f.compute_level();

    // Outputs are stored by the caller; anything but root placement is an
    // error.
    if is_output {
        if !(store_at.is_root() && compute_at.is_root()) {
            diags.push(
                Diagnostic::error(format!(
                    "{} is an output, so it must be scheduled compute_root (the default)",
                    f.name
                ))
                .with_code(codes::E0509)
                .with_func(f.name.clone()),
            );
        }
        return diags;
    }

    if store_at.is_inline() && compute_at.is_inline() {
        if !f.definition.specializations.is_empty() {
            diags.push(
                Diagnostic::error(format!(
                    "{} is scheduled inline, so it must not have any specializations",
                    f.name
                ))
                .with_code(codes::E0503)
                .with_func(f.name.clone())
                .with_hint("specialize on the scheduled function instead"),
            );
        }
        return diags;
    }

    // Inspect the uses to see which placements are legal.
    let mut legal = ComputeLegalSchedules::new(f, env);
    legal.visit_stmt(s);
    let sites: &[Site] = &legal.sites_allowed;

    let mut store_at_ok = false;
    let mut compute_at_ok = false;
    let mut store_idx = 0;
    let mut compute_idx = 0;
    for (i, site) in sites.iter().enumerate() {
        if site.loop_level.match_level(store_at) {
            store_at_ok = true;
            store_idx = i;
        }
        if site.loop_level.match_level(compute_at) {
            // Compute must be found at or inside the store level.
            compute_at_ok = store_at_ok;
            compute_idx = i;
        }
    }

    if store_at_ok && compute_at_ok {
        for site in &sites[store_idx + 1..=compute_idx] {
            if site.is_parallel {
                diags.push(
                    Diagnostic::error(format!(
                        "{} is stored outside the parallel loop over {} but computed \
                         within it; this is a potential race condition",
                        f.name, site.loop_level
                    ))
                    .with_code(codes::E0501)
                    .with_func(f.name.clone()),
                );
                store_at_ok = false;
                compute_at_ok = false;
            }
        }
    }

    if !store_at_ok || !compute_at_ok {
        let mut hint = String::from("legal locations for this function are:\n");
        for site in sites {
            hint.push_str(&format!(
                "  {}\n",
                schedule_to_source(f, &site.loop_level, &site.loop_level)
            ));
        }
        hint.push_str(&format!("{} is used in the following places:\n", f.name));
        write_uses_of_func(&f.name, s, &mut hint);
        diags.push(
            Diagnostic::error(format!(
                "{} is computed at an invalid location: {}",
                f.name,
                schedule_to_source(f, store_at, compute_at)
            ))
            .with_code(codes::E0500)
            .with_func(f.name.clone())
            .with_hint(hint),
        );
    }

    diags
}

/// The function's definitions, updates, and every specialization of each,
/// recursively.
fn all_definitions(f: &Function) -> Vec<&Definition> {
    let mut defs: Vec<&Definition> = Vec::new();
    let mut pending: Vec<&Definition> = vec![&f.definition];
    pending.extend(f.updates.iter());
    while let Some(def) = pending.pop() {
        defs.push(def);
        pending.extend(def.specializations.iter().map(|s| &s.definition));
    }
    defs
}

// ── Fused-pair validation ──────────────────────────────────────────────────

/// Validate every compute_with pair in every group.
pub fn validate_fused_groups(fused_groups: &[Vec<String>], env: &Env) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    for group in fused_groups {
        for name in group {
            let f = env
                .get(name)
                .unwrap_or_else(|| panic!("function {:?} not in environment", name));
            for stage in 0..f.stage_count() {
                validate_fused_pairs_of_stage(name, stage, f.stage_definition(stage), env, &mut diags);
            }
        }
    }
    diags
}

fn validate_fused_pairs_of_stage(
    fn_name: &str,
    stage: usize,
    def_1: &Definition,
    env: &Env,
    diags: &mut Vec<Diagnostic>,
) {
    for p in &def_1.schedule.fused_pairs {
        assert!(p.func_1 == fn_name && p.stage_1 == stage);

        let func_1 = &env[&p.func_1];
        // The function is not used anywhere.
        let func_2 = match env.get(&p.func_2) {
            Some(f) => f,
            None => continue,
        };
        let def_2 = func_2.stage_definition(p.stage_2);

        let pair_desc = format!(
            "{}.s{} with {}.s{}",
            p.func_1, p.stage_1, p.func_2, p.stage_2
        );

        if !func_2.definition.specializations.is_empty() {
            diags.push(
                Diagnostic::error(format!(
                    "{} is scheduled to be computed with {}, so it must not have any \
                     specializations",
                    func_2.name, func_1.name
                ))
                .with_code(codes::E0504)
                .with_func(func_2.name.clone()),
            );
        }

        for (func, stage) in [(func_1, p.stage_1), (func_2, p.stage_2)] {
            if func.compute_level().is_inline() {
                diags.push(
                    Diagnostic::error(format!(
                        "invalid compute_with: {}.s{} is scheduled inline",
                        func.name, stage
                    ))
                    .with_code(codes::E0511)
                    .with_func(func.name.clone()),
                );
            }
            if func.has_extern_definition() {
                diags.push(
                    Diagnostic::error(format!(
                        "invalid compute_with: {}.s{} has an extern definition",
                        func.name, stage
                    ))
                    .with_code(codes::E0512)
                    .with_func(func.name.clone()),
                );
            }
        }

        if p.func_1 != p.func_2 && func_1.compute_level() != func_2.compute_level() {
            diags.push(
                Diagnostic::error(format!(
                    "invalid compute_with: the compute levels of {}.s{} (at {}) and \
                     {}.s{} (at {}) do not match",
                    p.func_1,
                    p.stage_1,
                    func_1.compute_level(),
                    p.func_2,
                    p.stage_2,
                    func_2.compute_level()
                ))
                .with_code(codes::E0505)
                .with_func(p.func_2.clone()),
            );
        }

        // Dims from the fuse var upward must agree, ignoring __outermost.
        let dims_1 = &def_1.schedule.dims;
        let dims_2 = &def_2.schedule.dims;

        let idx_1 = match def_1.schedule.dim_index(&p.var_name) {
            Some(i) => i,
            None => {
                diags.push(missing_var_diag(&p.var_name, &p.func_1, p.stage_1));
                continue;
            }
        };
        let idx_2 = match def_2.schedule.dim_index(&p.var_name) {
            Some(i) => i,
            None => {
                diags.push(missing_var_diag(&p.var_name, &p.func_2, p.stage_2));
                continue;
            }
        };

        let n_fused = dims_1.len() - idx_1 - 1;
        if n_fused != dims_2.len() - idx_2 - 1 {
            diags.push(
                Diagnostic::error(format!(
                    "invalid compute_with: number of fused dims of {} do not match",
                    pair_desc
                ))
                .with_code(codes::E0506)
                .with_func(p.func_2.clone()),
            );
            continue;
        }
        for i in 0..n_fused {
            if dims_1[idx_1 + i] != dims_2[idx_2 + i] {
                diags.push(
                    Diagnostic::error(format!(
                        "invalid compute_with: dims {} of {} do not match ({} vs. {})",
                        i, pair_desc, dims_1[idx_1 + i].var, dims_2[idx_2 + i].var
                    ))
                    .with_code(codes::E0506)
                    .with_func(p.func_2.clone()),
                );
            }
        }

        // An update fused with its own preceding stage: the fused dims must
        // come from identical split histories, and a split feeding a fused
        // dim must not shift inwards (it would change which points the
        // update visits).
        if p.func_1 == p.func_2 {
            for i in 0..n_fused {
                let dim_var = &dims_1[idx_1 + i].var;
                if func_1.args.iter().any(|a| a == dim_var) {
                    continue;
                }
                if def_1.schedule.rvars.iter().any(|rv| &rv.var == dim_var) {
                    continue;
                }
                let s_1 = relevant_splits(dim_var, &def_1.schedule.splits);
                let s_2 = relevant_splits(dim_var, &def_2.schedule.splits);

                if s_1.len() != s_2.len() {
                    diags.push(split_history_diag(dim_var, &pair_desc, p));
                    continue;
                }
                for (a, b) in s_1.iter().zip(&s_2) {
                    let matches = a.kind == b.kind
                        && a.old_var == b.old_var
                        && a.outer == b.outer
                        && a.factor == b.factor
                        && a.exact == b.exact
                        && (!(a.is_split() || a.is_fuse()) || a.inner == b.inner);
                    if !matches {
                        diags.push(split_history_diag(dim_var, &pair_desc, p));
                    }
                    if a.is_split() && a.tail == TailStrategy::ShiftInwards {
                        diags.push(
                            Diagnostic::error(format!(
                                "ShiftInwards is not a legal tail strategy when splitting \
                                 {}: its inner/outer dims are fused, and shifting may \
                                 change the meaning of the algorithm",
                                a.old_var
                            ))
                            .with_code(codes::E0508)
                            .with_func(p.func_1.clone()),
                        );
                    }
                }
            }
        }
    }
}

fn missing_var_diag(var: &str, func: &str, stage: usize) -> Diagnostic {
    Diagnostic::error(format!(
        "invalid compute_with: cannot find {} in {}.s{}",
        var, func, stage
    ))
    .with_code(codes::E0514)
    .with_func(func.to_string())
}

fn split_history_diag(var: &str, pair_desc: &str, p: &crate::schedule::FusedPair) -> Diagnostic {
    Diagnostic::error(format!(
        "invalid compute_with: dim {} of {} results from different split histories",
        var, pair_desc
    ))
    .with_code(codes::E0507)
    .with_func(p.func_2.clone())
}

/// The splits that produced `var`, walking the split list backward and
/// growing the set of names known to feed it.
fn relevant_splits(var: &str, splits: &[Split]) -> Vec<Split> {
    let mut relevant_dims: Vec<String> = vec![var.to_string()];
    let mut out = Vec::new();
    for s in splits.iter().rev() {
        let mut relevant = relevant_dims.iter().any(|d| var_name_match(d, &s.old_var))
            || relevant_dims.iter().any(|d| var_name_match(d, &s.outer));
        if s.is_split() || s.is_fuse() {
            relevant = relevant || relevant_dims.iter().any(|d| var_name_match(d, &s.inner));
        }
        if relevant {
            relevant_dims.push(s.old_var.clone());
            relevant_dims.push(s.outer.clone());
            if s.is_split() || s.is_fuse() {
                relevant_dims.push(s.inner.clone());
            }
            out.push(s.clone());
        }
    }
    out
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::{has_errors, DiagLevel};
    use crate::ir::{add, for_loop, func_call, var, DeviceApi, Expr, ForType, Type};
    use crate::schedule::{Dim, LoopLevel};

    fn env_of(funcs: Vec<Function>) -> Env {
        funcs.into_iter().map(|f| (f.name.clone(), f)).collect()
    }

    fn consumer_skeleton() -> Stmt {
        // for (.__root) { for (g.s0.x) { g(x) = f(x) } }
        for_loop(
            LoopLevel::Root.to_string(),
            Expr::Int(0),
            Expr::Int(1),
            ForType::Serial,
            DeviceApi::Host,
            for_loop(
                "g.s0.x",
                Expr::Int(0),
                Expr::Int(8),
                ForType::Serial,
                DeviceApi::None,
                Stmt::Provide {
                    name: "g".into(),
                    values: vec![func_call("f", vec![var("x")], 0)],
                    site: vec![var("x")],
                },
            ),
        )
    }

    fn parallel_consumer_skeleton() -> Stmt {
        for_loop(
            LoopLevel::Root.to_string(),
            Expr::Int(0),
            Expr::Int(1),
            ForType::Serial,
            DeviceApi::Host,
            for_loop(
                "g.s0.x",
                Expr::Int(0),
                Expr::Int(8),
                ForType::Parallel,
                DeviceApi::None,
                Stmt::Provide {
                    name: "g".into(),
                    values: vec![func_call("f", vec![var("x")], 0)],
                    site: vec![var("x")],
                },
            ),
        )
    }

    fn f_g_env() -> Env {
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

    #[test]
    fn root_placement_of_used_function_is_legal() {
        let env = f_g_env();
        let diags = validate_schedule(
            &env["f"],
            &consumer_skeleton(),
            &Target::host(),
            false,
            &env,
        );
        assert!(!has_errors(&diags), "{:?}", diags);
    }

    #[test]
    fn compute_at_unused_level_is_rejected() {
        let mut env = f_g_env();
        env.get_mut("f").unwrap().definition.schedule.compute_level = LoopLevel::at("h", "y");
        env.get_mut("f").unwrap().definition.schedule.store_level = LoopLevel::at("h", "y");
        let diags = validate_schedule(
            &env["f"],
            &consumer_skeleton(),
            &Target::host(),
            false,
            &env,
        );
        assert!(diags.iter().any(|d| d.code == Some(codes::E0500)));
        // The hint explains the legal sites and the uses.
        let hint = diags[0].hint.as_ref().unwrap();
        assert!(hint.contains("legal locations"));
        assert!(hint.contains("g uses f") || hint.contains("uses f"));
    }

    #[test]
    fn store_outside_parallel_compute_inside_is_a_race() {
        let mut env = f_g_env();
        env.get_mut("f").unwrap().definition.schedule.store_level = LoopLevel::Root;
        env.get_mut("f").unwrap().definition.schedule.compute_level = LoopLevel::at("g", "x");
        let diags = validate_schedule(
            &env["f"],
            &parallel_consumer_skeleton(),
            &Target::host(),
            false,
            &env,
        );
        assert!(diags.iter().any(|d| d.code == Some(codes::E0501)));
    }

    #[test]
    fn non_root_output_is_rejected() {
        let mut env = f_g_env();
        env.get_mut("g").unwrap().definition.schedule.compute_level = LoopLevel::Inline;
        env.get_mut("g").unwrap().definition.schedule.store_level = LoopLevel::Inline;
        let diags =
            validate_schedule(&env["g"], &consumer_skeleton(), &Target::host(), true, &env);
        assert!(diags.iter().any(|d| d.code == Some(codes::E0509)));
    }

    #[test]
    fn inline_with_specializations_is_rejected() {
        let mut env = f_g_env();
        {
            let f = env.get_mut("f").unwrap();
            f.definition.schedule.compute_level = LoopLevel::Inline;
            f.definition.schedule.store_level = LoopLevel::Inline;
            let alt = f.definition.clone();
            f.definition.specializations.push(crate::func::Specialization {
                condition: var("c"),
                definition: alt,
            });
        }
        let diags = validate_schedule(
            &env["f"],
            &consumer_skeleton(),
            &Target::host(),
            false,
            &env,
        );
        assert!(diags.iter().any(|d| d.code == Some(codes::E0503)));
    }

    #[test]
    fn unsupported_device_api_is_rejected() {
        let mut env = f_g_env();
        env.get_mut("f").unwrap().definition.schedule.dims[0] = Dim {
            var: "x".into(),
            for_type: ForType::Parallel,
            device_api: DeviceApi::Cuda,
        };
        let diags = validate_schedule(
            &env["f"],
            &consumer_skeleton(),
            &Target::host(),
            false,
            &env,
        );
        assert!(diags.iter().any(|d| d.code == Some(codes::E0510)));
    }

    #[test]
    fn partial_schedule_warns_per_stage() {
        let mut env = f_g_env();
        {
            let f = env.get_mut("f").unwrap();
            f.add_update(vec![var("x")], vec![Expr::Int(0)]);
            f.add_update(vec![var("x")], vec![Expr::Int(1)]);
        }
        let diags = validate_schedule(
            &env["f"],
            &consumer_skeleton(),
            &Target::host(),
            false,
            &env,
        );
        let warnings: Vec<_> = diags
            .iter()
            .filter(|d| d.level == DiagLevel::Warning)
            .collect();
        assert_eq!(warnings.len(), 2);
    }

    // ── Fused pairs ─────────────────────────────────────────────────────

    fn fused_env() -> Env {
        let mut f = Function::new("f", vec!["x", "y"], vec![Type::Int32], vec![var("x")]);
        f.compute_root();
        let mut g = Function::new("g", vec!["x", "y"], vec![Type::Int32], vec![var("y")]);
        g.compute_root();
        g.compute_with(0, "f", "y");
        f.add_fused_child(0, "g", 0, "y");
        env_of(vec![f, g])
    }

    #[test]
    fn valid_fused_pair_passes() {
        let env = fused_env();
        let groups = vec![vec!["f".to_string(), "g".to_string()]];
        let diags = validate_fused_groups(&groups, &env);
        assert!(!has_errors(&diags), "{:?}", diags);
    }

    #[test]
    fn inline_participant_is_rejected() {
        let mut env = fused_env();
        env.get_mut("g").unwrap().definition.schedule.compute_level = LoopLevel::Inline;
        let groups = vec![vec!["f".to_string(), "g".to_string()]];
        let diags = validate_fused_groups(&groups, &env);
        assert!(diags.iter().any(|d| d.code == Some(codes::E0511)));
    }

    #[test]
    fn mismatched_compute_levels_are_rejected() {
        let mut env = fused_env();
        env.get_mut("g").unwrap().definition.schedule.compute_level = LoopLevel::at("h", "y");
        let groups = vec![vec!["f".to_string(), "g".to_string()]];
        let diags = validate_fused_groups(&groups, &env);
        assert!(diags.iter().any(|d| d.code == Some(codes::E0505)));
    }

    #[test]
    fn mismatched_dims_are_rejected() {
        let mut env = fused_env();
        // g's y loop becomes parallel; the fused dims no longer agree.
        env.get_mut("g").unwrap().definition.schedule.dims[1].for_type = ForType::Parallel;
        let groups = vec![vec!["f".to_string(), "g".to_string()]];
        let diags = validate_fused_groups(&groups, &env);
        assert!(diags.iter().any(|d| d.code == Some(codes::E0506)));
    }

    #[test]
    fn missing_fuse_var_is_rejected() {
        let mut env = fused_env();
        env.get_mut("f").unwrap().definition.schedule.fused_pairs[0].var_name = "z".into();
        let groups = vec![vec!["f".to_string(), "g".to_string()]];
        let diags = validate_fused_groups(&groups, &env);
        assert!(diags.iter().any(|d| d.code == Some(codes::E0514)));
    }

    #[test]
    fn self_fuse_with_shift_inwards_split_is_rejected() {
        use crate::schedule::TailStrategy;
        let mut f = Function::new("f", vec!["x"], vec![Type::Int32], vec![Expr::Int(0)]);
        f.compute_root();
        f.add_update(vec![var("x")], vec![add(var("x"), Expr::Int(1))]);
        // Same split on both stages, but with ShiftInwards.
        f.definition
            .schedule
            .split("x", "xo", "xi", Expr::Int(4), TailStrategy::ShiftInwards);
        f.updates[0]
            .schedule
            .split("x", "xo", "xi", Expr::Int(4), TailStrategy::ShiftInwards);
        f.compute_with(1, "f", "xo");
        f.add_fused_child(0, "f", 1, "xo");
        let env = env_of(vec![f]);
        let groups = vec![vec!["f".to_string()]];
        let diags = validate_fused_groups(&groups, &env);
        assert!(diags.iter().any(|d| d.code == Some(codes::E0508)), "{:?}", diags);
    }

    #[test]
    fn self_fuse_with_diverging_split_history_is_rejected() {
        use crate::schedule::TailStrategy;
        let mut f = Function::new("f", vec!["x"], vec![Type::Int32], vec![Expr::Int(0)]);
        f.compute_root();
        f.add_update(vec![var("x")], vec![add(var("x"), Expr::Int(1))]);
        f.definition
            .schedule
            .split("x", "xo", "xi", Expr::Int(4), TailStrategy::GuardWithIf);
        f.updates[0]
            .schedule
            .split("x", "xo", "xi", Expr::Int(8), TailStrategy::GuardWithIf);
        f.compute_with(1, "f", "xo");
        f.add_fused_child(0, "f", 1, "xo");
        let env = env_of(vec![f]);
        let groups = vec![vec!["f".to_string()]];
        let diags = validate_fused_groups(&groups, &env);
        assert!(diags.iter().any(|d| d.code == Some(codes::E0507)), "{:?}", diags);
    }
}
