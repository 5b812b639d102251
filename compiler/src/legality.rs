// legality.rs — Where may a function legally be computed?
//
// Walks a skeleton statement recording, at every use of a function (a call
// to it or a reference to one of its buffer handles), the stack of
// enclosing loops. The sites allowed for the function are the intersection
// across all uses: a compute level outside any consumer is wasted work, one
// inside none is a dangling producer. Also provides the smaller use queries
// shared by the injectors, and the printer used to explain placement
// errors.

use std::collections::HashMap;

use crate::func::Function;
use crate::names::OUTERMOST;
use crate::schedule::LoopLevel;
use crate::ir::{CallKind, Expr, Stmt};
use crate::visit::{walk_expr, walk_stmt, IrVisitor};

// ── Use queries ────────────────────────────────────────────────────────────

fn is_buffer_ref_of(name: &str, func: &str) -> bool {
    name.starts_with(&format!("{}.", func)) && name.ends_with(".buffer")
}

struct IsUsedInStmt<'a> {
    func: &'a str,
    result: bool,
}

impl IrVisitor for IsUsedInStmt<'_> {
    fn visit_expr(&mut self, e: &Expr) {
        walk_expr(self, e);
        match e {
            Expr::Call { name, kind, .. } => {
                if matches!(kind, CallKind::Func { .. }) && name == self.func {
                    self.result = true;
                }
            }
            // A reference to the function's buffers counts as a use.
            Expr::Handle(name) => {
                if is_buffer_ref_of(name, self.func) {
                    self.result = true;
                }
            }
            _ => {}
        }
    }
}

/// True iff `s` calls `func` or references one of its buffer handles.
pub fn function_is_used_in_stmt(func: &Function, s: &Stmt) -> bool {
    let mut v = IsUsedInStmt {
        func: &func.name,
        result: false,
    };
    v.visit_stmt(s);
    v.result
}

struct IsRealizedInStmt<'a> {
    func: &'a str,
    result: bool,
}

impl IrVisitor for IsRealizedInStmt<'_> {
    fn visit_stmt(&mut self, s: &Stmt) {
        if let Stmt::Realize { name, .. } = s {
            if name == self.func {
                self.result = true;
            }
        }
        walk_stmt(self, s);
    }
}

/// True iff `s` already contains a `Realize` of `func`.
pub fn function_is_already_realized_in_stmt(func: &Function, s: &Stmt) -> bool {
    let mut v = IsRealizedInStmt {
        func: &func.name,
        result: false,
    };
    v.visit_stmt(s);
    v.result
}

// ── Legal sites ────────────────────────────────────────────────────────────

/// One enclosing loop at a use site.
#[derive(Debug, Clone)]
pub struct Site {
    pub is_parallel: bool,
    pub loop_level: LoopLevel,
}

/// Computes the loop levels at which a function may be computed without
/// being outside any of its consumers. `sites_allowed` is ordered
/// outermost first.
pub struct ComputeLegalSchedules<'a> {
    pub sites_allowed: Vec<Site>,
    func: &'a Function,
    found: bool,
    sites: Vec<Site>,
    env: &'a HashMap<String, Function>,
}

impl<'a> ComputeLegalSchedules<'a> {
    pub fn new(func: &'a Function, env: &'a HashMap<String, Function>) -> Self {
        ComputeLegalSchedules {
            sites_allowed: Vec::new(),
            func,
            found: false,
            sites: Vec::new(),
            env,
        }
    }

    fn register_use(&mut self) {
        if !self.found {
            self.found = true;
            self.sites_allowed = self.sites.clone();
        } else {
            let common: Vec<Site> = self
                .sites
                .iter()
                .filter(|s1| {
                    self.sites_allowed
                        .iter()
                        .any(|s2| s1.loop_level.match_level(&s2.loop_level))
                })
                .cloned()
                .collect();
            self.sites_allowed = common;
        }
    }
}

impl IrVisitor for ComputeLegalSchedules<'_> {
    fn visit_stmt(&mut self, s: &Stmt) {
        if let Stmt::For {
            name,
            min,
            extent,
            for_type,
            body,
            ..
        } = s
        {
            self.visit_expr(min);
            self.visit_expr(extent);

            let first_dot = name.find('.').expect("unqualified loop name");
            let last_dot = name.rfind('.').unwrap();
            let func = &name[..first_dot];
            let var = &name[last_dot + 1..];
            let loop_level = if func.is_empty() {
                assert!(!var.is_empty());
                LoopLevel::Root
            } else {
                assert!(
                    self.env.contains_key(func),
                    "function {:?} not in environment (var = {:?})",
                    func,
                    var
                );
                LoopLevel::at(func, var)
            };
            self.sites.push(Site {
                is_parallel: for_type.is_parallel(),
                loop_level,
            });
            self.visit_stmt(body);
            self.sites.pop();
        } else {
            walk_stmt(self, s);
        }
    }

    fn visit_expr(&mut self, e: &Expr) {
        walk_expr(self, e);
        match e {
            Expr::Call { name, kind, .. } => {
                if matches!(kind, CallKind::Func { .. }) && *name == self.func.name {
                    self.register_use();
                }
            }
            Expr::Handle(name) => {
                if is_buffer_ref_of(name, &self.func.name) {
                    self.register_use();
                }
            }
            _ => {}
        }
    }
}

// ── Error-message helpers ──────────────────────────────────────────────────

/// Render a store/compute placement as front-end scheduling calls.
pub fn schedule_to_source(f: &Function, store_at: &LoopLevel, compute_at: &LoopLevel) -> String {
    let mut out = f.name.clone();
    if compute_at.is_inline() {
        out.push_str(".compute_inline()");
    } else {
        if !store_at.match_level(compute_at) {
            match store_at {
                LoopLevel::Root => out.push_str(".store_root()"),
                LoopLevel::At { func, var } => {
                    out.push_str(&format!(".store_at({}, {})", func, var));
                }
                LoopLevel::Inline => {}
            }
        }
        match compute_at {
            LoopLevel::Root => out.push_str(".compute_root()"),
            LoopLevel::At { func, var } => {
                out.push_str(&format!(".compute_at({}, {})", func, var));
            }
            LoopLevel::Inline => unreachable!(),
        }
    }
    out.push(';');
    out
}

/// Append a sketch of where `func` is used inside `s`: the loops leading to
/// each use, eliding loops with no use beneath them.
pub fn write_uses_of_func(func: &str, s: &Stmt, out: &mut String) {
    let mut printer = UsePrinter {
        func,
        caller: String::new(),
        indent: 1,
        last_was_ellipsis: false,
        out,
    };
    printer.visit_stmt(s);
}

struct UsePrinter<'a> {
    func: &'a str,
    caller: String,
    indent: usize,
    last_was_ellipsis: bool,
    out: &'a mut String,
}

impl UsePrinter<'_> {
    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }
}

impl IrVisitor for UsePrinter<'_> {
    fn visit_stmt(&mut self, s: &Stmt) {
        match s {
            Stmt::For { name, body, .. } => {
                if name.ends_with(OUTERMOST) || name.ends_with(&LoopLevel::Root.to_string()) {
                    walk_stmt(self, s);
                    return;
                }
                let mut uses = IsUsedInStmt {
                    func: self.func,
                    result: false,
                };
                uses.visit_stmt(body);
                if !uses.result {
                    if !self.last_was_ellipsis {
                        self.line("...");
                        self.last_was_ellipsis = true;
                    }
                    return;
                }
                self.line(&format!("for {}:", name));
                self.last_was_ellipsis = false;
                self.indent += 1;
                walk_stmt(self, s);
                self.indent -= 1;
            }
            Stmt::ProducerConsumer {
                name,
                is_producer: true,
                body,
            } => {
                let old = std::mem::replace(&mut self.caller, name.clone());
                self.visit_stmt(body);
                self.caller = old;
            }
            _ => walk_stmt(self, s),
        }
    }

    fn visit_expr(&mut self, e: &Expr) {
        if let Expr::Call { name, kind, .. } = e {
            if matches!(kind, CallKind::Func { .. }) && name == self.func {
                let caller = self.caller.clone();
                self.line(&format!("{} uses {}", caller, self.func));
                self.last_was_ellipsis = false;
                return;
            }
        }
        walk_expr(self, e);
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
