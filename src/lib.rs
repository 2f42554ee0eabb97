//! Purpose: Shared library crate used by the `obmkit` CLI, the share server, and tests.
//! Exports: `api` (stable operations and types), `notice` (stderr notice schema).
//! Role: Backup normalization, form flattening, measurement extraction, secret storage.
//! Invariants: Operations take explicit inputs and return reports; no hidden global state.
//! Invariants: `core` stays private; `api` is the only public path to it.
pub mod api;
mod core;
mod json;
pub mod notice;
