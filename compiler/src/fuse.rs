// fuse.rs — Injecting a group of functions that share loops
//
// Functions scheduled with compute_with execute as one interleaved nest:
// each member's stages are built with range guards on the fused dims and
// injected into the evolving producer at their fuse level; child loops are
// then renamed to `<func>.s<stage>.fused.<var>` and collapsed to a single
// iteration of the parent's loop var; finally the parent's bounds are
// widened to the union of every fused sibling's bounds, walking the
// transitive closure of the fused pairs.
//
// Preconditions: group members share the parent's compute and store levels
//   and have passed fused-pair validation; none is inline or extern.
// Postconditions: `found_compute_level` and `found_store_level` are true;
//   `diagnostics` holds any user errors discovered while building.
// Failure modes: panics on internal invariant violations (fuse vars or
//   captured bounds missing).
// Side effects: none beyond the mutator's own fields.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::diag::{codes, Diagnostic};
use crate::func::{Definition, Function};
use crate::ir::{add, block, for_loop, let_stmt, sub, var, Expr, ForType, Stmt};
use crate::inject::inject_stmt;
use crate::legality::function_is_used_in_stmt;
use crate::loop_nest::build_provide_loop_nest;
use crate::names::stage_prefix;
use crate::produce::build_realize;
use crate::schedule::{FusedPair, LoopLevel};
use crate::simplify::{is_one, simplify};
use crate::subst::substitute;
use crate::target::Target;
use crate::visit::{remake_stmt, IrMutator};

type Env = HashMap<String, Function>;

// ── Bound capture and replacement ──────────────────────────────────────────

/// Renames child fused loops, rewrites their bounds, and captures the
/// original bindings of every name listed in `bounds`.
struct SubstituteBounds<'a> {
    /// Names whose current binding must be captured from the statement.
    bounds: &'a mut HashMap<String, Option<Expr>>,
    /// Loop-bound names that must be replaced.
    replacements: &'a HashMap<String, Expr>,
}

impl IrMutator for SubstituteBounds<'_> {
    fn mutate_stmt(&mut self, s: Stmt) -> Stmt {
        match s {
            Stmt::Let { name, value, body } => {
                if let Some(slot) = self.bounds.get_mut(&name) {
                    *slot = Some(value.clone());
                }
                let body = self.mutate_stmt(*body);
                let_stmt(name, value, body)
            }
            Stmt::For {
                name,
                min,
                extent,
                for_type,
                device_api,
                body,
            } => {
                let replaced = match (&min, &extent) {
                    (Expr::Var(min_name), Expr::Var(extent_name)) => {
                        match (
                            self.replacements.get(min_name),
                            self.replacements.get(extent_name),
                        ) {
                            (Some(min_val), Some(extent_val)) => {
                                Some((min_val.clone(), extent_val.clone()))
                            }
                            _ => None,
                        }
                    }
                    _ => None,
                };

                match replaced {
                    None => {
                        let body = self.mutate_stmt(*body);
                        for_loop(name, min, extent, for_type, device_api, body)
                    }
                    Some((min_val, extent_val)) => {
                        let body = self.mutate_stmt(*body);

                        let last_dot = name.rfind('.').expect("unqualified loop name");
                        let new_var =
                            format!("{}.fused.{}", &name[..last_dot], &name[last_dot + 1..]);

                        // The child loop runs one parent iteration; a
                        // parallel or vector tag on it is meaningless.
                        let for_type = if is_one(&extent_val) {
                            ForType::Serial
                        } else {
                            for_type
                        };

                        let mut stmt = for_loop(
                            new_var.clone(),
                            var(format!("{}.loop_min", new_var)),
                            var(format!("{}.loop_extent", new_var)),
                            for_type,
                            device_api,
                            body,
                        );
                        stmt = let_stmt(format!("{}.loop_min", new_var), min_val.clone(), stmt);
                        stmt = let_stmt(
                            format!("{}.loop_max", new_var),
                            simplify(sub(add(min_val, extent_val.clone()), Expr::Int(1))),
                            stmt,
                        );
                        stmt = let_stmt(format!("{}.loop_extent", new_var), extent_val, stmt);
                        substitute(&name, &var(new_var), stmt)
                    }
                }
            }
            other => remake_stmt(self, other),
        }
    }
}

/// Apply bound capture and loop replacement to `s`.
fn substitute_bounds(
    s: Stmt,
    bounds: &mut HashMap<String, Option<Expr>>,
    replacements: &HashMap<String, Expr>,
) -> Stmt {
    SubstituteBounds {
        bounds,
        replacements,
    }
    .mutate_stmt(s)
}

// ── Group injector ─────────────────────────────────────────────────────────

/// Injects the allocation and production of a fused group. `group[0]` is
/// the parent whose loops the others join.
pub struct InjectGroupRealization<'a> {
    group: &'a [Function],
    is_output_list: &'a [bool],
    pub found_store_level: bool,
    pub found_compute_level: bool,
    pub diagnostics: Vec<Diagnostic>,
    target: &'a Target,
    compute_level: LoopLevel,
    store_level: LoopLevel,
    env: &'a Env,
}

impl<'a> InjectGroupRealization<'a> {
    pub fn new(
        group: &'a [Function],
        is_output_list: &'a [bool],
        target: &'a Target,
        env: &'a Env,
    ) -> Self {
        assert!(!group.is_empty());
        assert_eq!(group.len(), is_output_list.len());
        let compute_level = group[0].compute_level().clone();
        let store_level = group[0].store_level().clone();
        assert!(!compute_level.is_inline());
        InjectGroupRealization {
            group,
            is_output_list,
            found_store_level: false,
            found_compute_level: false,
            diagnostics: Vec::new(),
            target,
            compute_level,
            store_level,
            env,
        }
    }

    fn build_pipeline_group(&mut self, s: Stmt) -> Stmt {
        // Members neither used under this loop nor outputs contribute
        // nothing here.
        let mut skip: HashMap<String, bool> = HashMap::new();
        let mut num_skipped = 0;
        for (f, &is_output) in self.group.iter().zip(self.is_output_list) {
            if function_is_used_in_stmt(f, &s) || is_output {
                skip.insert(f.name.clone(), false);
            } else {
                skip.insert(f.name.clone(), true);
                num_skipped += 1;
            }
        }
        if num_skipped == self.group.len() {
            return s;
        }
        if skip[&self.group[0].name] {
            let names: Vec<&str> = self.group.iter().map(|f| f.name.as_str()).collect();
            self.diagnostics.push(
                Diagnostic::error(format!(
                    "invalid compute_with: the parent function {} of fused group {{ {} }} \
                     is not used at the compute level {}",
                    self.group[0].name,
                    names.join(", "),
                    self.compute_level
                ))
                .with_code(codes::E0513)
                .with_func(self.group[0].name.clone()),
            );
            return s;
        }

        // Consumer side, innermost member first.
        let mut consume = s;
        for f in self.group.iter().rev() {
            if !skip[&f.name] {
                consume = Stmt::ProducerConsumer {
                    name: f.name.clone(),
                    is_producer: false,
                    body: Box::new(consume),
                };
            }
        }

        // Producer side. `bounds` collects the original (pre-fusion)
        // bindings of every bound we will need; `replacements` the
        // rewrites of child fused-loop bounds.
        let mut bounds: HashMap<String, Option<Expr>> = HashMap::new();
        let mut replacements: HashMap<String, Expr> = HashMap::new();
        let mut add_lets: Vec<(String, Expr)> = Vec::new();

        let mut produce: Option<Stmt> = None;
        let mut parent_index = None;
        for (i, f) in self.group.iter().enumerate() {
            if !skip[&f.name] {
                produce = Some(self.build_member(
                    &skip,
                    f,
                    produce,
                    &mut bounds,
                    &mut replacements,
                    &mut add_lets,
                ));
                if parent_index.is_none() {
                    parent_index = Some(i);
                }
            }
        }
        let parent_index = parent_index.unwrap();
        let mut produce = produce.unwrap();

        // Rewrap the stripped lets: the union bounds computed below may
        // refer to them, so they must sit outside every fused loop.
        for (name, value) in add_lets.into_iter().rev() {
            produce = let_stmt(name, value, produce);
        }

        // Point each child fused loop at its parent's loop var (singleton
        // range), capturing original bindings along the way.
        produce = substitute_bounds(produce, &mut bounds, &replacements);

        // Widen the parent's bounds to the union over the fused siblings.
        produce =
            self.replace_parent_bound_with_union_bound(&skip, &self.group[parent_index], produce, &bounds);

        for f in self.group.iter().rev() {
            if !skip[&f.name] {
                produce = Stmt::ProducerConsumer {
                    name: f.name.clone(),
                    is_producer: true,
                    body: Box::new(produce),
                };
            }
        }

        block(produce, consume)
    }

    /// Build and inject every stage of one member into the evolving
    /// producer statement.
    fn build_member(
        &self,
        skip: &HashMap<String, bool>,
        f: &Function,
        mut produce: Option<Stmt>,
        bounds: &mut HashMap<String, Option<Expr>>,
        replacements: &mut HashMap<String, Expr>,
        add_lets: &mut Vec<(String, Expr)>,
    ) -> Stmt {
        let stmt = self.build_member_stage(
            skip,
            f,
            &stage_prefix(&f.name, 0),
            &f.definition,
            false,
            bounds,
            replacements,
            add_lets,
        );
        produce = Some(inject_stmt(
            produce,
            stmt,
            &f.definition.schedule.fuse_level,
        ));

        for (j, def) in f.updates.iter().enumerate() {
            let stmt = self.build_member_stage(
                skip,
                f,
                &stage_prefix(&f.name, j + 1),
                def,
                true,
                bounds,
                replacements,
                add_lets,
            );
            produce = Some(inject_stmt(produce, stmt, &def.schedule.fuse_level));
        }
        produce.unwrap()
    }

    #[allow(clippy::too_many_arguments)]
    fn build_member_stage(
        &self,
        skip: &HashMap<String, bool>,
        f: &Function,
        prefix: &str,
        def: &Definition,
        is_update: bool,
        bounds: &mut HashMap<String, Option<Expr>>,
        replacements: &mut HashMap<String, Expr>,
        add_lets: &mut Vec<(String, Expr)>,
    ) -> Stmt {
        let dims = &def.schedule.dims;
        let fuse_level = &def.schedule.fuse_level;

        let mut start_fuse = dims.len();
        if let LoopLevel::At { func, var } = fuse_level {
            let skipped = *skip
                .get(func)
                .unwrap_or_else(|| panic!("fuse target {:?} outside group", func));
            if !skipped {
                start_fuse = def
                    .schedule
                    .dim_index(var)
                    .unwrap_or_else(|| panic!("fuse var {:?} not in dims of {}", var, f.name));
            }
        }

        // Register the bound rewrites for every stage fused into this one:
        // the child's loops from the fuse var outward collapse onto the
        // parent's loop vars. The __outermost dim is ignored throughout.
        for pair in &def.schedule.fused_pairs {
            if !self.env.contains_key(&pair.func_2) {
                continue;
            }
            if *skip.get(&pair.func_2).expect("fused child outside group") {
                continue;
            }
            let idx = def
                .schedule
                .dim_index(&pair.var_name)
                .unwrap_or_else(|| {
                    panic!("fused var {:?} not in dims of {}", pair.var_name, f.name)
                });
            start_fuse = start_fuse.min(idx);

            for dim in &dims[idx..dims.len() - 1] {
                let child = format!(
                    "{}.s{}.{}",
                    pair.func_2, pair.stage_2, dim.var
                );
                bounds.entry(format!("{}.loop_min", child)).or_insert(None);
                bounds.entry(format!("{}.loop_max", child)).or_insert(None);
                bounds
                    .entry(format!("{}.loop_extent", child))
                    .or_insert(None);

                let parent = format!(
                    "{}.s{}.{}",
                    pair.func_1, pair.stage_1, dim.var
                );
                let val = var(parent.clone());
                replacements.insert(format!("{}.loop_min", child), val.clone());
                replacements.insert(format!("{}.loop_max", child), val);
                replacements.insert(format!("{}.loop_extent", child), Expr::Int(1));

                bounds.entry(format!("{}.loop_min", parent)).or_insert(None);
                bounds.entry(format!("{}.loop_max", parent)).or_insert(None);
                bounds
                    .entry(format!("{}.loop_extent", parent))
                    .or_insert(None);
            }
        }

        let start_fuse = if start_fuse < dims.len() {
            Some(start_fuse)
        } else {
            None
        };
        let mut stmt =
            build_provide_loop_nest(&f.name, prefix, start_fuse, &f.args, def, is_update);

        // Strip the outer lets: union bounds of the parent loops may refer
        // to them, so they must move to the topmost position.
        while let Stmt::Let { name, value, body } = stmt {
            add_lets.push((name, value));
            stmt = *body;
        }
        stmt
    }

    /// Transitive closure of the fused pairs reachable from `def`,
    /// ignoring skipped children.
    fn collect_all_dependence(
        &self,
        skip: &HashMap<String, bool>,
        def: &Definition,
    ) -> Vec<FusedPair> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut dependence: Vec<FusedPair> = Vec::new();
        self.collect_dependence_from(skip, def, &mut dependence, &mut visited);
        dependence
    }

    fn collect_dependence_from(
        &self,
        skip: &HashMap<String, bool>,
        def: &Definition,
        dependence: &mut Vec<FusedPair>,
        visited: &mut HashSet<String>,
    ) {
        for pair in &def.schedule.fused_pairs {
            if *skip.get(&pair.func_2).unwrap_or(&true) {
                continue;
            }
            let f = match self.env.get(&pair.func_2) {
                Some(f) => f,
                None => continue,
            };
            let key = format!("{}.s{}.{}", pair.func_2, pair.stage_2, pair.var_name);
            if visited.insert(key) {
                dependence.push(pair.clone());
                let def_2 = f.stage_definition(pair.stage_2);
                self.collect_dependence_from(skip, def_2, dependence, visited);
            }
        }
    }

    /// Replace the parent's loop bounds with the union of the captured
    /// bounds of every fused stage, outward from each pair's fuse var.
    fn replace_parent_bound_with_union_bound(
        &self,
        skip: &HashMap<String, bool>,
        parent: &Function,
        produce: Stmt,
        bounds: &HashMap<String, Option<Expr>>,
    ) -> Stmt {
        let prefix = format!("{}.s0", parent.name);
        let def = &parent.definition;
        let dims = &def.schedule.dims;

        let captured = |name: &str| -> Expr {
            bounds
                .get(name)
                .and_then(|b| b.clone())
                .unwrap_or_else(|| panic!("bound {:?} was never captured", name))
        };

        let mut replacements: HashMap<String, Expr> = HashMap::new();
        for pair in self.collect_all_dependence(skip, def) {
            if *skip.get(&pair.func_2).unwrap_or(&true) {
                continue;
            }
            let idx = def
                .schedule
                .dim_index(&pair.var_name)
                .unwrap_or_else(|| {
                    panic!(
                        "fused var {:?} not in dims of {}",
                        pair.var_name, parent.name
                    )
                });
            for dim in &dims[idx..dims.len() - 1] {
                let child = format!("{}.s{}.{}", pair.func_2, pair.stage_2, dim.var);
                let min_2 = captured(&format!("{}.loop_min", child));
                let max_2 = captured(&format!("{}.loop_max", child));
                assert!(bounds.contains_key(&format!("{}.loop_extent", child)));

                let parent_var = format!("{}.{}", prefix, dim.var);
                let (min_1, max_1) = match replacements.get(&format!("{}.loop_min", parent_var)) {
                    Some(m) => (
                        m.clone(),
                        replacements[&format!("{}.loop_max", parent_var)].clone(),
                    ),
                    None => (
                        captured(&format!("{}.loop_min", parent_var)),
                        captured(&format!("{}.loop_max", parent_var)),
                    ),
                };

                let new_min = simplify(crate::ir::min(min_1, min_2));
                let new_max = simplify(crate::ir::max(max_1, max_2));
                let new_extent = simplify(sub(add(new_max.clone(), Expr::Int(1)), new_min.clone()));
                replacements.insert(format!("{}.loop_min", parent_var), new_min);
                replacements.insert(format!("{}.loop_max", parent_var), new_max);
                replacements.insert(format!("{}.loop_extent", parent_var), new_extent);
            }
        }

        let mut no_capture = HashMap::new();
        substitute_bounds(produce, &mut no_capture, &replacements)
    }

    fn build_realize_group(&self, mut s: Stmt) -> Stmt {
        for (f, &is_output) in self.group.iter().zip(self.is_output_list).rev() {
            if function_is_used_in_stmt(f, &s) || is_output {
                s = build_realize(s, f, is_output, self.target);
            }
        }
        s
    }
}

impl IrMutator for InjectGroupRealization<'_> {
    fn mutate_stmt(&mut self, s: Stmt) -> Stmt {
        let (name, min, extent, for_type, device_api, body) = match s {
            Stmt::For {
                name,
                min,
                extent,
                for_type,
                device_api,
                body,
            } => (name, min, extent, for_type, device_api, body),
            other => return remake_stmt(self, other),
        };
        debug!("injecting fused group: entering loop over {}", name);

        let mut lets: Vec<(String, Expr)> = Vec::new();
        let mut body = *body;
        while let Stmt::Let {
            name: ln,
            value,
            body: inner,
        } = body
        {
            lets.push((ln, value));
            body = *inner;
        }

        body = self.mutate_stmt(body);

        if self.compute_level.match_loop(&name) {
            debug!("found fused group compute level at {}", name);
            body = self.build_pipeline_group(body);
            self.found_compute_level = true;
        }

        if self.store_level.match_loop(&name) {
            debug!("found fused group store level at {}", name);
            assert!(
                self.found_compute_level,
                "the fused group compute level was not found within its store level"
            );
            body = self.build_realize_group(body);
            self.found_store_level = true;
        }

        for (ln, value) in lets.into_iter().rev() {
            body = let_stmt(ln, value, body);
        }

        for_loop(name, min, extent, for_type, device_api, body)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{func_call, DeviceApi, Type};

    fn env_of(funcs: &[Function]) -> Env {
        funcs
            .iter()
            .cloned()
            .map(|f| (f.name.clone(), f))
            .collect()
    }

    /// f (parent) and g, fused at y, both compute_root.
    fn fused_pair() -> (Function, Function) {
        let mut f = Function::new(
            "f",
            vec!["x", "y"],
            vec![Type::Int32],
            vec![add(var("x"), var("y"))],
        );
        let mut g = Function::new("g", vec!["x", "y"], vec![Type::Int32], vec![var("y")]);
        f.compute_root();
        g.compute_root();
        g.compute_with(0, "f", "y");
        f.add_fused_child(0, "g", 0, "y");
        (f, g)
    }

    fn first_for(s: &Stmt) -> Option<&Stmt> {
        match s {
            Stmt::For { .. } => Some(s),
            Stmt::Let { body, .. } => first_for(body),
            _ => None,
        }
    }

    #[test]
    fn all_skipped_members_leave_the_statement_alone() {
        let (f, g) = fused_pair();
        let group = vec![f, g];
        let is_output_list = vec![false, false];
        let target = Target::host();
        let env = env_of(&group);
        let mut injector = InjectGroupRealization::new(&group, &is_output_list, &target, &env);

        // Neither member is used here, so there is nothing to build.
        let s = Stmt::Evaluate(Expr::Int(0));
        let out = injector.build_pipeline_group(s.clone());
        assert_eq!(out, s);
        assert!(injector.diagnostics.is_empty());
    }

    #[test]
    fn skipped_parent_is_a_user_error() {
        let (f, g) = fused_pair();
        let group = vec![f, g];
        let is_output_list = vec![false, false];
        let target = Target::host();
        let env = env_of(&group);
        let mut injector = InjectGroupRealization::new(&group, &is_output_list, &target, &env);

        // Only the child is consumed at this level; the parent whose loops
        // the group shares is skipped.
        let s = Stmt::Provide {
            name: "out".into(),
            values: vec![func_call("g", vec![var("x"), var("y")], 0)],
            site: vec![var("x"), var("y")],
        };
        let out = injector.build_pipeline_group(s.clone());
        assert_eq!(out, s);
        assert!(injector
            .diagnostics
            .iter()
            .any(|d| d.code == Some(codes::E0513)));
    }

    #[test]
    fn child_loop_is_renamed_and_collapsed_to_serial() {
        // A child loop whose min/max collapse onto the parent's loop var
        // and whose extent becomes 1.
        let body = Stmt::Evaluate(var("g.s0.y"));
        let child = for_loop(
            "g.s0.y",
            var("g.s0.y.loop_min"),
            var("g.s0.y.loop_extent"),
            ForType::Parallel,
            DeviceApi::None,
            body,
        );
        let s = let_stmt("g.s0.y.loop_min", var("g.s0.y.min"), child);

        let mut bounds: HashMap<String, Option<Expr>> = HashMap::new();
        bounds.insert("g.s0.y.loop_min".into(), None);
        let mut replacements: HashMap<String, Expr> = HashMap::new();
        replacements.insert("g.s0.y.loop_min".into(), var("f.s0.y"));
        replacements.insert("g.s0.y.loop_max".into(), var("f.s0.y"));
        replacements.insert("g.s0.y.loop_extent".into(), Expr::Int(1));

        let out = substitute_bounds(s, &mut bounds, &replacements);

        // The original binding was captured on the way down.
        assert_eq!(bounds["g.s0.y.loop_min"], Some(var("g.s0.y.min")));

        let text = format!("{}", out);
        assert!(text.contains("let g.s0.fused.y.loop_min = f.s0.y"));
        assert!(text.contains("let g.s0.fused.y.loop_max = f.s0.y"));
        assert!(text.contains("let g.s0.fused.y.loop_extent = 1"));

        match first_for(&out).expect("renamed loop") {
            Stmt::For {
                name,
                for_type,
                body,
                ..
            } => {
                assert_eq!(name, "g.s0.fused.y");
                // A parallel tag on a single-iteration loop is meaningless.
                assert_eq!(*for_type, ForType::Serial);
                // References to the old loop var are rewritten.
                assert_eq!(**body, Stmt::Evaluate(var("g.s0.fused.y")));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn wider_fused_loops_keep_their_tag() {
        let parent = for_loop(
            "f.s0.y",
            var("f.s0.y.loop_min"),
            var("f.s0.y.loop_extent"),
            ForType::Parallel,
            DeviceApi::None,
            Stmt::Evaluate(Expr::Int(0)),
        );
        let mut bounds: HashMap<String, Option<Expr>> = HashMap::new();
        let mut replacements: HashMap<String, Expr> = HashMap::new();
        replacements.insert("f.s0.y.loop_min".into(), var("u.min"));
        replacements.insert("f.s0.y.loop_max".into(), var("u.max"));
        replacements.insert("f.s0.y.loop_extent".into(), var("u.extent"));

        let out = substitute_bounds(parent, &mut bounds, &replacements);
        match first_for(&out).expect("renamed loop") {
            Stmt::For { name, for_type, .. } => {
                assert_eq!(name, "f.s0.fused.y");
                assert_eq!(*for_type, ForType::Parallel);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn untouched_loops_pass_through() {
        let loop_ = for_loop(
            "f.s0.x",
            var("f.s0.x.loop_min"),
            var("f.s0.x.loop_extent"),
            ForType::Serial,
            DeviceApi::None,
            Stmt::Evaluate(Expr::Int(0)),
        );
        let mut bounds: HashMap<String, Option<Expr>> = HashMap::new();
        let replacements: HashMap<String, Expr> = HashMap::new();
        let out = substitute_bounds(loop_.clone(), &mut bounds, &replacements);
        assert_eq!(out, loop_);
    }

    #[test]
    fn parent_bounds_become_the_union() {
        let (f, g) = fused_pair();
        let group = vec![f.clone(), g];
        let is_output_list = vec![false, false];
        let target = Target::host();
        let env = env_of(&group);
        let injector = InjectGroupRealization::new(&group, &is_output_list, &target, &env);

        let mut skip: HashMap<String, bool> = HashMap::new();
        skip.insert("f".into(), false);
        skip.insert("g".into(), false);

        // Captured original bounds of both stages' y loops.
        let mut bounds: HashMap<String, Option<Expr>> = HashMap::new();
        for func in ["f", "g"] {
            bounds.insert(
                format!("{}.s0.y.loop_min", func),
                Some(var(format!("{}.s0.y.min", func))),
            );
            bounds.insert(
                format!("{}.s0.y.loop_max", func),
                Some(var(format!("{}.s0.y.max", func))),
            );
            bounds.insert(
                format!("{}.s0.y.loop_extent", func),
                Some(var(format!("{}.s0.y.extent", func))),
            );
        }

        let produce = for_loop(
            "f.s0.y",
            var("f.s0.y.loop_min"),
            var("f.s0.y.loop_extent"),
            ForType::Serial,
            DeviceApi::None,
            Stmt::Evaluate(Expr::Int(0)),
        );
        let out = injector.replace_parent_bound_with_union_bound(&skip, &f, produce, &bounds);

        let text = format!("{}", out);
        assert!(text.contains("let f.s0.fused.y.loop_min = min(f.s0.y.min, g.s0.y.min)"));
        assert!(text.contains("let f.s0.fused.y.loop_max = max(f.s0.y.max, g.s0.y.max)"));
        assert!(text.contains(
            "let f.s0.fused.y.loop_extent = \
             ((max(f.s0.y.max, g.s0.y.max) + 1) - min(f.s0.y.min, g.s0.y.min))"
        ));
    }

    #[test]
    fn dependence_closure_follows_grandchildren() {
        // h fused into g, g fused into f: the closure from f must reach h.
        let (f, mut g) = fused_pair();
        let mut h = Function::new("h", vec!["x", "y"], vec![Type::Int32], vec![var("x")]);
        h.compute_root();
        h.compute_with(0, "g", "y");
        g.add_fused_child(0, "h", 0, "y");
        let group = vec![f.clone(), g, h];
        let is_output_list = vec![false, false, false];
        let target = Target::host();
        let env = env_of(&group);
        let injector = InjectGroupRealization::new(&group, &is_output_list, &target, &env);

        let mut skip: HashMap<String, bool> = HashMap::new();
        for name in ["f", "g", "h"] {
            skip.insert(name.into(), false);
        }
        let pairs = injector.collect_all_dependence(&skip, &f.definition);
        let children: Vec<&str> = pairs.iter().map(|p| p.func_2.as_str()).collect();
        assert_eq!(children, ["g", "h"]);

        // A skipped child cuts its branch out of the closure.
        skip.insert("h".into(), true);
        let pairs = injector.collect_all_dependence(&skip, &f.definition);
        let children: Vec<&str> = pairs.iter().map(|p| p.func_2.as_str()).collect();
        assert_eq!(children, ["g"]);
    }
}
