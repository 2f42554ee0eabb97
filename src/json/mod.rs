//! Purpose: Internal JSON parsing boundary shared by every decode callsite.
//! Exports: `parse` module with decode helpers and failure categorization.
//! Role: Single seam for parser usage so callsites avoid ad hoc decode logic.
//! Invariants: Backup, form, and extract decoding go through this module.
//! Invariants: Helper APIs stay small and deterministic (no hidden global state).

pub(crate) mod parse;
