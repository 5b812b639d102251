// names.rs — Qualified-name construction and matching
//
// All cross-component identifiers in the lowered tree are dotted strings:
// loop variables are `<func>.s<stage>.<var>`, their bounds add `.loop_min` /
// `.loop_max` / `.loop_extent`, realization bounds use `.min_realized` /
// `.extent_realized`, and bounds inference later supplies `.min` / `.max`.
// Downstream passes rely on these spellings byte-for-byte.

use std::sync::atomic::{AtomicUsize, Ordering};

/// The synthetic dim every schedule ends with; its loop has extent 1 and is
/// stripped after injection.
pub const OUTERMOST: &str = "__outermost";

/// Name prefix of one stage's loop variables: `"<func>.s<stage>."`.
pub fn stage_prefix(func: &str, stage: usize) -> String {
    format!("{}.s{}.", func, stage)
}

/// Fully qualified loop variable for one stage dim.
pub fn stage_var(func: &str, stage: usize, var: &str) -> String {
    format!("{}.s{}.{}", func, stage, var)
}

/// True iff `candidate` names `var`, ignoring any function/stage prefix.
/// `var` must be unqualified.
pub fn var_name_match(candidate: &str, var: &str) -> bool {
    assert!(
        !var.contains('.'),
        "var_name_match expects an unqualified name, got {:?}",
        var
    );
    candidate == var || candidate.ends_with(&format!(".{}", var))
}

/// Fresh name for a compiler-introduced binding. The counter is process-wide
/// so concurrent lowerings never collide.
pub fn unique_name(prefix: char) -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}{}", prefix, n)
}

// ── Tests ──────────────────────────────────────────────────────────────────
