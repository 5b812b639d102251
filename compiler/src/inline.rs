// inline.rs — Substituting an inlined function into its consumers
//
// Replaces every call to a pure, single-valued function with its value,
// the pure vars substituted by the call's index expressions. Used for
// functions scheduled compute_inline with no fusion involvement.

use log::debug;

use crate::func::Function;
use crate::ir::{CallKind, Expr, Stmt};
use crate::subst::substitute_expr;
use crate::visit::{remake_expr, IrMutator};

struct Inliner<'a> {
    func: &'a Function,
}

impl IrMutator for Inliner<'_> {
    fn mutate_expr(&mut self, e: Expr) -> Expr {
        match e {
            Expr::Call { name, args, kind }
                if matches!(kind, CallKind::Func { value_index: 0 })
                    && name == self.func.name =>
            {
                // Inline inside the call's own arguments first.
                let args: Vec<Expr> = args.into_iter().map(|a| self.mutate_expr(a)).collect();
                assert_eq!(args.len(), self.func.args.len());
                let mut value = self.func.definition.values[0].clone();
                for (pure_var, arg) in self.func.args.iter().zip(&args) {
                    value = substitute_expr(pure_var, arg, value);
                }
                value
            }
            other => remake_expr(self, other),
        }
    }
}

/// Inline `f` into every use inside `s`.
pub fn inline_function(s: Stmt, f: &Function) -> Stmt {
    assert!(
        f.can_be_inlined(),
        "{} cannot be inlined (extern, impure, or multi-valued)",
        f.name
    );
    debug!("inlining {}", f.name);
    Inliner { func: f }.mutate_stmt(s)
}

// ── Tests ──────────────────────────────────────────────────────────────────
