// This module provides arena-based compilation session management using the bumpalo crate.
// CompilationSession owns the arena for everything that must outlive a single function's
// CompilationContext: interned function names and the per-function block-offset tables that the
// executable writer and the disassembly listing consult after compilation. Per-function contexts
// stay short-lived and are never stored here. SessionStats accumulates metrics over the session
// (functions compiled, total and largest code size, per-opcode instruction counts) which the
// module compiler logs at debug level when it finishes.

//! Arena-based compilation session management.
//!
//! Module-wide results share the session lifetime, so compiled functions can
//! hand out borrowed names and offset tables without copying.

use crate::ir::Opcode;
use bumpalo::Bump;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;

/// Arena-backed state shared by every function compiled in a session.
pub struct CompilationSession<'arena> {
    /// Arena allocator for session-lifetime objects.
    arena: &'arena Bump,

    /// Session statistics for diagnostics.
    stats: RefCell<SessionStats>,

    /// String interning for function names.
    interned_strings: RefCell<HashMap<String, &'arena str>>,
}

impl<'arena> CompilationSession<'arena> {
    /// Create a new compilation session with the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
            interned_strings: RefCell::new(HashMap::new()),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Copy a slice into the session arena.
    pub fn alloc_slice<T: Copy>(&self, slice: &[T]) -> &'arena [T] {
        self.arena.alloc_slice_copy(slice)
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }

        let interned = self.arena.alloc_str(s);
        strings.insert(s.to_string(), interned);
        interned
    }

    /// Record that a function was compiled.
    pub fn record_function_compiled(&self, name: &str, code_size: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.functions_compiled += 1;
        stats.total_code_size += code_size;

        if stats.largest_function_size < code_size || stats.largest_function_name.is_empty() {
            stats.largest_function_size = code_size;
            stats.largest_function_name = name.to_string();
        }
    }

    /// Record an instruction encoding.
    pub fn record_instruction_compiled(&self, opcode: Opcode) {
        let mut stats = self.stats.borrow_mut();
        stats.instructions_compiled += 1;
        *stats.instruction_counts.entry(opcode).or_insert(0) += 1;
    }

    /// Snapshot of the statistics so far.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Compilation statistics.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub functions_compiled: usize,
    pub instructions_compiled: usize,
    pub total_code_size: usize,
    pub largest_function_size: usize,
    pub largest_function_name: String,
    pub instruction_counts: HashMap<Opcode, usize>,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Statistics:")?;
        writeln!(f, "  Functions compiled: {}", self.functions_compiled)?;
        writeln!(f, "  Instructions compiled: {}", self.instructions_compiled)?;
        writeln!(f, "  Total code size: {} bytes", self.total_code_size)?;
        if self.functions_compiled > 0 {
            writeln!(
                f,
                "  Largest function: {} ({} bytes)",
                self.largest_function_name, self.largest_function_size
            )?;
        }

        let mut counts: Vec<_> = self.instruction_counts.iter().collect();
        counts.sort_by_key(|(op, _)| op.byte());
        for (op, count) in counts {
            writeln!(f, "    {op}: {count}")?;
        }
        Ok(())
    }
}
