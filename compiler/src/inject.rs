// inject.rs — Injecting one function's realization into the skeleton
//
// A mutator that walks the skeleton loop tree and, at the function's
// compute level, wraps the loop body in produce/consume markers around the
// built production; at its store level, wraps it in the allocation region.
// Loop-level matching must look through fusion: a stage fused into another
// stage has had its outer loops merged away, so only loops strictly inner
// to the fuse point are valid injection sites.
//
// Preconditions: the function's schedule has been validated against the
//   skeleton; bound-binding lets may sit between a loop and its body.
// Postconditions: `found_compute_level` and `found_store_level` are both
//   true, compute found at or before store.
// Failure modes: panics if the store level is found before the compute
//   level (validation should have rejected the schedule).
// Side effects: none beyond the mutator's own flags.

use std::collections::HashMap;

use log::debug;

use crate::func::Function;
use crate::ir::{block, for_loop, let_stmt, DeviceApi, Expr, ForType, Stmt};
use crate::legality::{function_is_already_realized_in_stmt, function_is_used_in_stmt};
use crate::produce::{build_production, build_realize};
use crate::schedule::LoopLevel;
use crate::target::Target;
use crate::visit::{remake_stmt, IrMutator};

/// Injects the allocation and production of a function that is not part of
/// any fused group.
pub struct InjectRealization<'a> {
    func: &'a Function,
    is_output: bool,
    pub found_store_level: bool,
    pub found_compute_level: bool,
    target: &'a Target,
    env: &'a HashMap<String, Function>,
}

impl<'a> InjectRealization<'a> {
    pub fn new(
        func: &'a Function,
        is_output: bool,
        target: &'a Target,
        env: &'a HashMap<String, Function>,
    ) -> Self {
        InjectRealization {
            func,
            is_output,
            found_store_level: false,
            found_compute_level: false,
            target,
            env,
        }
    }

    fn build_pipeline(&self, consumer: Stmt) -> Stmt {
        let (produce, updates) = build_production(self.func, self.env, self.target);
        let producer = match updates {
            Some(u) => block(produce, u),
            None => produce,
        };
        let producer = Stmt::ProducerConsumer {
            name: self.func.name.clone(),
            is_producer: true,
            body: Box::new(producer),
        };
        let consumer = Stmt::ProducerConsumer {
            name: self.func.name.clone(),
            is_producer: false,
            body: Box::new(consumer),
        };
        block(producer, consumer)
    }

    fn build_realize(&self, s: Stmt) -> Stmt {
        build_realize(s, self.func, self.is_output, self.target)
    }

    // A loop is the right injection level only if the stage owning it is
    // not fused away at or outside the matched var.
    fn is_the_right_level(&self, loop_name: &str) -> bool {
        if loop_name == LoopLevel::Root.to_string() {
            return true;
        }

        let parts: Vec<&str> = loop_name.split('.').collect();
        assert!(parts.len() > 2, "malformed loop name {:?}", loop_name);
        let func_name = parts[0];
        let var = parts[parts.len() - 1];

        let stage = parts[1..parts.len() - 1]
            .iter()
            .find_map(|p| p.strip_prefix('s').and_then(|d| d.parse::<usize>().ok()))
            .unwrap_or_else(|| panic!("no stage index in loop name {:?}", loop_name));

        let f = self
            .env
            .get(func_name)
            .unwrap_or_else(|| panic!("function {:?} not in environment", func_name));
        assert!(stage < f.stage_count());

        let def = f.stage_definition(stage);
        let fuse_level = &def.schedule.fuse_level;
        if fuse_level.is_inline() || fuse_level.is_root() {
            // Not fused into anyone.
            return true;
        }
        let fuse_var = match fuse_level {
            LoopLevel::At { var, .. } => var,
            _ => unreachable!(),
        };
        let fuse_idx = def
            .schedule
            .dim_index(fuse_var)
            .unwrap_or_else(|| panic!("fuse var {:?} not in dims of {}", fuse_var, func_name));
        let var_idx = def
            .schedule
            .dim_index(var)
            .unwrap_or_else(|| panic!("loop var {:?} not in dims of {}", var, func_name));
        var_idx < fuse_idx
    }

    #[allow(clippy::too_many_arguments)]
    fn mutate_for(
        &mut self,
        name: String,
        min: Expr,
        extent: Expr,
        for_type: ForType,
        device_api: DeviceApi,
        body: Stmt,
    ) -> Stmt {
        debug!(
            "injecting {}: entering loop over {}",
            self.func.name, name
        );

        // An extern stage scheduled inline cannot live inside a vectorized
        // loop; realize it around the whole loop instead.
        if self.func.has_extern_definition()
            && self.func.compute_level().is_inline()
            && for_type == ForType::Vectorized
        {
            let whole = for_loop(
                name.clone(),
                min.clone(),
                extent.clone(),
                for_type,
                device_api,
                body.clone(),
            );
            if !function_is_already_realized_in_stmt(self.func, &whole)
                && function_is_used_in_stmt(self.func, &whole)
            {
                debug!(
                    "injecting realization of {} around vectorized loop {}",
                    self.func.name, name
                );
                self.found_store_level = true;
                self.found_compute_level = true;
                return self.build_realize(self.build_pipeline(whole));
            }
        }

        // Dig through bound-binding lets so they do not hide the loop body
        // from level matching.
        let mut lets: Vec<(String, Expr)> = Vec::new();
        let mut body = body;
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

        let compute_level = self.func.compute_level().clone();
        let store_level = self.func.store_level().clone();

        if compute_level.match_loop(&name) && self.is_the_right_level(&name) {
            debug!("found compute level of {} at {}", self.func.name, name);
            if !function_is_already_realized_in_stmt(self.func, &body)
                && (function_is_used_in_stmt(self.func, &body) || self.is_output)
            {
                body = self.build_pipeline(body);
            }
            self.found_compute_level = true;
        }

        if store_level.match_loop(&name) && self.is_the_right_level(&name) {
            debug!("found store level of {} at {}", self.func.name, name);
            assert!(
                self.found_compute_level,
                "the compute loop level of {} was not found within its store level",
                self.func.name
            );
            if !function_is_already_realized_in_stmt(self.func, &body)
                && (function_is_used_in_stmt(self.func, &body) || self.is_output)
            {
                body = self.build_realize(body);
            }
            self.found_store_level = true;
        }

        for (ln, value) in lets.into_iter().rev() {
            body = let_stmt(ln, value, body);
        }

        for_loop(name, min, extent, for_type, device_api, body)
    }
}

impl IrMutator for InjectRealization<'_> {
    fn mutate_stmt(&mut self, s: Stmt) -> Stmt {
        match s {
            Stmt::For {
                name,
                min,
                extent,
                for_type,
                device_api,
                body,
            } => self.mutate_for(name, min, extent, for_type, device_api, *body),
            // An impure function still scheduled inline is realized
            // immediately around each Provide that consumes it.
            provide @ Stmt::Provide { .. } => {
                let other = match &provide {
                    Stmt::Provide { name, .. } => name != &self.func.name,
                    _ => unreachable!(),
                };
                if other
                    && !self.func.is_pure()
                    && self.func.compute_level().is_inline()
                    && function_is_used_in_stmt(self.func, &provide)
                {
                    self.found_store_level = true;
                    self.found_compute_level = true;
                    self.build_realize(self.build_pipeline(provide))
                } else {
                    provide
                }
            }
            other => remake_stmt(self, other),
        }
    }
}

/// Appends a statement to the body of the loop matching `level`.
struct InjectStmt<'a> {
    injected: Option<Stmt>,
    found_level: bool,
    level: &'a LoopLevel,
}

impl IrMutator for InjectStmt<'_> {
    fn mutate_stmt(&mut self, s: Stmt) -> Stmt {
        match s {
            Stmt::For {
                name,
                min,
                extent,
                for_type,
                device_api,
                body,
            } => {
                let mut body = self.mutate_stmt(*body);
                if self.level.match_loop(&name) {
                    let injected = self.injected.take().expect("level matched twice");
                    body = block(body, injected);
                    self.found_level = true;
                }
                for_loop(name, min, extent, for_type, device_api, body)
            }
            other => remake_stmt(self, other),
        }
    }
}

/// Inject `injected` into `root` at `level`; inline/root levels append as a
/// sibling block.
pub fn inject_stmt(root: Option<Stmt>, injected: Stmt, level: &LoopLevel) -> Stmt {
    let root = match root {
        None => return injected,
        Some(r) => r,
    };
    if level.is_inline() || level.is_root() {
        return block(root, injected);
    }
    let mut injector = InjectStmt {
        injected: Some(injected),
        found_level: false,
        level,
    };
    let root = injector.mutate_stmt(root);
    assert!(injector.found_level, "fuse level {} not found", level);
    root
}

// ── Tests ──────────────────────────────────────────────────────────────────
