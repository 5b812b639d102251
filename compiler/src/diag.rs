// diag.rs — Unified diagnostics model
//
// Shared diagnostic types for schedule validation and lowering. The pass
// consumes an in-memory pipeline environment rather than source text, so a
// diagnostic is anchored to a function name instead of a span.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0505`, `W0500`).
///
/// Codes are `&'static str` constants defined in the `codes` module. Once
/// assigned, a code must never be reassigned to a different semantic
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable diagnostic codes for the scheduling pass.
pub mod codes {
    use super::DiagCode;

    /// Invalid compute/store placement for a function.
    pub const E0500: DiagCode = DiagCode("E0500");
    /// Parallel loop between the store and compute levels (race).
    pub const E0501: DiagCode = DiagCode("E0501");
    /// Input of an extern function scheduled inline.
    pub const E0502: DiagCode = DiagCode("E0502");
    /// Specializations on an inline function.
    pub const E0503: DiagCode = DiagCode("E0503");
    /// Specializations on a function fused into another.
    pub const E0504: DiagCode = DiagCode("E0504");
    /// Compute levels of a fused pair do not match.
    pub const E0505: DiagCode = DiagCode("E0505");
    /// Fused dims of a pair do not match.
    pub const E0506: DiagCode = DiagCode("E0506");
    /// Fused dims result from different split histories.
    pub const E0507: DiagCode = DiagCode("E0507");
    /// ShiftInwards tail strategy on a split producing a fused var.
    pub const E0508: DiagCode = DiagCode("E0508");
    /// Output function not scheduled compute_root/store_root.
    pub const E0509: DiagCode = DiagCode("E0509");
    /// Schedule requires a device API the target does not support.
    pub const E0510: DiagCode = DiagCode("E0510");
    /// Inline stage participating in a fused pair.
    pub const E0511: DiagCode = DiagCode("E0511");
    /// Extern function participating in a fused pair.
    pub const E0512: DiagCode = DiagCode("E0512");
    /// Parent of a fused group unused at the compute level.
    pub const E0513: DiagCode = DiagCode("E0513");
    /// compute_with names a var absent from a stage's dim list.
    pub const E0514: DiagCode = DiagCode("E0514");
    /// Some stages of a function scheduled, others not.
    pub const W0500: DiagCode = DiagCode("W0500");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by schedule validation or the lowering driver.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    /// The function the diagnostic is about, when there is one.
    pub func: Option<String>,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            func: None,
            message: message.into(),
            hint: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach the offending function's name.
    pub fn with_func(mut self, func: impl Into<String>) -> Self {
        self.func = Some(func.into());
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// True if any diagnostic in the slice is error-level.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_code() {
        let d = Diagnostic::error("something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code_and_hint() {
        let d = Diagnostic::warning("update stage 1 of f not scheduled")
            .with_code(codes::W0500)
            .with_func("f")
            .with_hint("call f.update(1) to suppress");
        assert_eq!(
            format!("{d}"),
            "warning[W0500]: update stage 1 of f not scheduled\n  hint: call f.update(1) to suppress"
        );
        assert_eq!(d.func.as_deref(), Some("f"));
    }

    #[test]
    fn error_detection() {
        assert!(!has_errors(&[Diagnostic::warning("w")]));
        assert!(has_errors(&[
            Diagnostic::warning("w"),
            Diagnostic::error("e")
        ]));
    }
}
