// produce.rs — Emitting the production of one function
//
// For a pure function this is the loop nest over its definition and update
// stages. For a function with an external implementation it is the call to
// that implementation: buffer descriptors for function/buffer arguments, a
// temporary sub-region descriptor when the store level differs from the
// compute level, sanitizer annotations when the target asks for them, and a
// success check on the returned code.
//
// Preconditions: the function's schedule has been validated.
// Postconditions: returned statements reference only symbolic bounds
//   (`.min`/`.max`, `.min_realized`/`.extent_realized`, `.stride.<k>`).
// Failure modes: panics if an extern argument names a function absent from
//   the environment.
// Side effects: none.

use std::collections::HashMap;

use crate::func::{ExternArgument, Function};
use crate::ir::{
    add, and, block, block_opt, eq, extern_call, func_call, ge, handle, le, let_stmt, sub, var,
    address_of, block_of, const_true, CallKind, Expr, Range, Stmt,
};
use crate::loop_nest::build_provide_loop_nest;
use crate::names::{stage_prefix, unique_name};
use crate::subst::qualify;
use crate::target::Target;

/// Build the statement producing `f`'s initial definition.
pub fn build_produce(f: &Function, env: &HashMap<String, Function>, target: &Target) -> Stmt {
    if f.has_extern_definition() {
        build_extern_produce(f, env, target)
    } else {
        build_provide_loop_nest(
            &f.name,
            &stage_prefix(&f.name, 0),
            None,
            &f.args,
            &f.definition,
            false,
        )
    }
}

/// Build the loop nests for each update stage, in stage order.
pub fn build_update(f: &Function) -> Vec<Stmt> {
    f.updates
        .iter()
        .enumerate()
        .map(|(i, def)| {
            build_provide_loop_nest(&f.name, &stage_prefix(&f.name, i + 1), None, &f.args, def, true)
        })
        .collect()
}

/// The full production of a function: `(initial, merged updates)`.
pub fn build_production(
    f: &Function,
    env: &HashMap<String, Function>,
    target: &Target,
) -> (Stmt, Option<Stmt>) {
    (build_produce(f, env, target), block_of(build_update(f)))
}

// ── Extern stages ──────────────────────────────────────────────────────────

fn buffer_handle_names(f: &Function) -> Vec<String> {
    (0..f.outputs())
        .map(|k| {
            if f.outputs() > 1 {
                format!("{}.{}.buffer", f.name, k)
            } else {
                format!("{}.buffer", f.name)
            }
        })
        .collect()
}

fn build_extern_produce(f: &Function, env: &HashMap<String, Function>, target: &Target) -> Stmt {
    let extern_def = f.extern_def.as_ref().unwrap();
    let prefix = stage_prefix(&f.name, 0);

    let mut extern_call_args: Vec<Expr> = Vec::new();
    let mut lets: Vec<(String, Expr)> = Vec::new();
    // Descriptors we own get marked initialized under msan; contents only
    // for inputs the pipeline itself produced.
    let mut buffers_to_annotate: Vec<Expr> = Vec::new();
    let mut contents_to_annotate: Vec<Expr> = Vec::new();

    for arg in &extern_def.args {
        match arg {
            ExternArgument::Expr(e) => {
                extern_call_args.push(qualify(&prefix, e.clone()));
            }
            ExternArgument::Func(name) => {
                let input = env
                    .get(name)
                    .unwrap_or_else(|| panic!("extern input {:?} not in environment", name));
                for buf_name in buffer_handle_names(input) {
                    let buf = handle(buf_name);
                    extern_call_args.push(buf.clone());
                    buffers_to_annotate.push(buf.clone());
                    contents_to_annotate.push(buf);
                }
            }
            ExternArgument::Buffer(name) => {
                let buf = handle(format!("{}.buffer", name));
                extern_call_args.push(buf.clone());
                buffers_to_annotate.push(buf.clone());
                contents_to_annotate.push(buf);
            }
            // Caller fills an image param's descriptor and contents;
            // annotating here could mask a missed initialization.
            ExternArgument::ImageParam(name) => {
                extern_call_args.push(handle(format!("{}.buffer", name)));
            }
        }
    }

    if f.store_level() == f.compute_level() {
        // The callee writes straight into the realized buffer; allocation
        // bounds inference has already injected its descriptor.
        for buf_name in buffer_handle_names(f) {
            let buf = handle(buf_name);
            extern_call_args.push(buf.clone());
            // Descriptor is ours; contents are the callee's to fill.
            buffers_to_annotate.push(buf);
        }
    } else {
        // Store level differs from compute level: synthesize a descriptor
        // for just the sub-region this instance computes.
        let stride_name = if f.outputs() > 1 {
            format!("{}.0", f.name)
        } else {
            f.name.clone()
        };
        let stage_name = stage_prefix(&f.name, 0);
        for j in 0..f.outputs() {
            let top_left: Vec<Expr> = f
                .args
                .iter()
                .map(|a| var(format!("{}{}.min", stage_name, a)))
                .collect();
            let host_ptr = address_of(func_call(&f.name, top_left, j));

            let mut buffer_args = vec![host_ptr, f.output_types[j].zero()];
            for (k, a) in f.args.iter().enumerate() {
                let lo = var(format!("{}{}.min", stage_name, a));
                let hi = var(format!("{}{}.max", stage_name, a));
                buffer_args.push(lo.clone());
                buffer_args.push(add(sub(hi, lo), Expr::Int(1)));
                buffer_args.push(var(format!("{}.stride.{}", stride_name, k)));
            }
            let descriptor = Expr::Call {
                name: "create_buffer_descriptor".into(),
                args: buffer_args,
                kind: CallKind::Intrinsic,
            };

            let buf_name = format!("{}.{}.tmp_buffer", f.name, j);
            extern_call_args.push(handle(buf_name.clone()));
            buffers_to_annotate.push(handle(buf_name.clone()));
            lets.push((buf_name, descriptor));
        }
    }

    let mut annotate: Option<Stmt> = None;
    if target.msan {
        let descriptor_size = Expr::Call {
            name: "size_of_buffer_descriptor".into(),
            args: vec![],
            kind: CallKind::Intrinsic,
        };
        for buf in &buffers_to_annotate {
            let mark = Stmt::Evaluate(extern_call(
                "halide_msan_annotate_memory_is_initialized",
                vec![buf.clone(), descriptor_size.clone()],
            ));
            annotate = block_opt(annotate, Some(mark));
        }
        for buf in &contents_to_annotate {
            let mark = Stmt::Evaluate(extern_call(
                "halide_msan_annotate_buffer_is_initialized",
                vec![buf.clone()],
            ));
            annotate = block_opt(annotate, Some(mark));
        }
    }

    // The call itself, bound to a fresh name and checked for success.
    let e = extern_call(extern_def.name.clone(), extern_call_args);
    let result_name = unique_name('t');
    let result = var(result_name.clone());
    let error = extern_call(
        "halide_error_extern_stage_failed",
        vec![Expr::Str(extern_def.name.clone()), result.clone()],
    );
    let mut check = Stmt::Assert {
        condition: eq(result, Expr::Int(0)),
        message: error,
    };
    check = let_stmt(result_name, e, check);
    for (name, value) in lets {
        check = let_stmt(name, value, check);
    }

    match annotate {
        Some(a) => block(a, check),
        None => check,
    }
}

// ── Explicit bounds ────────────────────────────────────────────────────────

/// Prepend, for every user-supplied bound and every stage, an assertion
/// that the bound covers the inferred region. Alignment-only bounds are
/// skipped; they expand, never shrink.
pub fn inject_explicit_bounds(mut body: Stmt, func: &Function) -> Stmt {
    for stage in 0..func.stage_count() {
        for b in &func.schedule().bounds {
            let extent = match &b.extent {
                Some(e) => e.clone(),
                None => continue,
            };
            let prefix = format!("{}{}", stage_prefix(&func.name, stage), b.var);
            let min_var = var(format!("{}.min", prefix));
            let max_var = var(format!("{}.max", prefix));
            let min_val = b.min.clone().unwrap_or_else(|| min_var.clone());
            let max_val = sub(add(extent, min_val.clone()), Expr::Int(1));

            let check = and(
                le(min_val.clone(), min_var.clone()),
                ge(max_val.clone(), max_var.clone()),
            );
            let error = extern_call(
                "halide_error_explicit_bounds_too_small",
                vec![
                    Expr::Str(b.var.clone()),
                    Expr::Str(func.name.clone()),
                    min_val,
                    max_val,
                    min_var,
                    max_var,
                ],
            );
            body = block(
                Stmt::Assert {
                    condition: check,
                    message: error,
                },
                body,
            );
        }
    }
    body
}

/// Wrap `s` in the allocation region owning `func`'s storage (outputs are
/// stored by the caller), then prepend the explicit-bound assertions unless
/// the target suppresses asserts.
pub fn build_realize(s: Stmt, func: &Function, is_output: bool, target: &Target) -> Stmt {
    let s = if is_output {
        s
    } else {
        let bounds: Vec<Range> = func
            .args
            .iter()
            .map(|arg| Range {
                min: var(format!("{}.{}.min_realized", func.name, arg)),
                extent: var(format!("{}.{}.extent_realized", func.name, arg)),
            })
            .collect();
        Stmt::Realize {
            name: func.name.clone(),
            types: func.output_types.clone(),
            bounds,
            condition: const_true(),
            body: Box::new(s),
        }
    };

    if target.no_asserts {
        s
    } else {
        inject_explicit_bounds(s, func)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Type;
    use crate::schedule::LoopLevel;

    fn env_of(funcs: Vec<Function>) -> HashMap<String, Function> {
        funcs.into_iter().map(|f| (f.name.clone(), f)).collect()
    }

    fn extern_f(store_matches_compute: bool) -> (Function, HashMap<String, Function>) {
        let input = Function::new("in", vec!["x"], vec![Type::Float32], vec![var("x")]);
        let mut f = Function::new("f", vec!["x"], vec![Type::Float32], vec![]);
        f.define_extern(
            "process",
            vec![
                ExternArgument::Expr(Expr::Int(3)),
                ExternArgument::Func("in".into()),
            ],
        );
        f.compute_root();
        if !store_matches_compute {
            f.definition.schedule.store_level = LoopLevel::at("g", "y");
        }
        let env = env_of(vec![input, f.clone()]);
        (f, env)
    }

    #[test]
    fn extern_produce_checks_result() {
        let (f, env) = extern_f(true);
        let s = build_produce(&f, &env, &Target::host());
        let text = format!("{}", s);
        assert!(text.contains("process(3, &in.buffer, &f.buffer)"));
        assert!(text.contains("halide_error_extern_stage_failed(\"process\""));
        assert!(!text.contains("tmp_buffer"));
    }

    #[test]
    fn extern_store_elsewhere_builds_tmp_descriptor() {
        let (f, env) = extern_f(false);
        let s = build_produce(&f, &env, &Target::host());
        let text = format!("{}", s);
        assert!(text.contains("let f.0.tmp_buffer = create_buffer_descriptor("));
        assert!(text.contains("f.stride.0"));
        assert!(text.contains("address_of(f(f.s0.x.min))"));
    }

    #[test]
    fn msan_annotates_descriptors_and_contents() {
        let (f, env) = extern_f(true);
        let mut target = Target::host();
        target.msan = true;
        let text = format!("{}", build_produce(&f, &env, &target));
        // Input buffer annotated twice (descriptor + contents), output once.
        assert_eq!(
            text.matches("halide_msan_annotate_memory_is_initialized").count(),
            2
        );
        assert_eq!(
            text.matches("halide_msan_annotate_buffer_is_initialized").count(),
            1
        );
    }

    #[test]
    fn explicit_bounds_emit_one_assert_per_stage() {
        let mut f = Function::new("f", vec!["x"], vec![Type::Int32], vec![var("x")]);
        f.add_update(vec![var("x")], vec![Expr::Int(0)]);
        f.bound("x", Expr::Int(0), Expr::Int(4));
        let body = inject_explicit_bounds(Stmt::Evaluate(Expr::Int(0)), &f);
        let text = format!("{}", body);
        assert_eq!(
            text.matches("halide_error_explicit_bounds_too_small").count(),
            2
        );
        assert!(text.contains("f.s0.x.min"));
        assert!(text.contains("f.s1.x.min"));
    }

    #[test]
    fn alignment_only_bounds_are_skipped() {
        let mut f = Function::new("f", vec!["x"], vec![Type::Int32], vec![var("x")]);
        f.definition.schedule.bounds.push(crate::schedule::Bound {
            var: "x".into(),
            min: None,
            extent: None,
            modulus: Some(Expr::Int(16)),
        });
        let body = inject_explicit_bounds(Stmt::Evaluate(Expr::Int(0)), &f);
        assert_eq!(body, Stmt::Evaluate(Expr::Int(0)));
    }

    #[test]
    fn realize_uses_realization_bound_names() {
        let f = Function::new("f", vec!["x", "y"], vec![Type::Int32], vec![var("x")]);
        let s = build_realize(Stmt::Evaluate(Expr::Int(0)), &f, false, &Target::host());
        let text = format!("{}", s);
        assert!(text.contains("[f.x.min_realized, f.x.extent_realized]"));
        assert!(text.contains("[f.y.min_realized, f.y.extent_realized]"));
    }

    #[test]
    fn outputs_are_not_realized() {
        let f = Function::new("f", vec!["x"], vec![Type::Int32], vec![var("x")]);
        let s = build_realize(Stmt::Evaluate(Expr::Int(0)), &f, true, &Target::host());
        assert_eq!(s, Stmt::Evaluate(Expr::Int(0)));
    }
}
