//! Purpose: Library crate for paged, cached, and batched access to remote tables.
//! Exports: `api` (public surface), `core` (references, schemas, rows, views, errors).
//! Role: Backs the `tabula` CLI and integration tests.
//! Invariants: Core modules never perform I/O; all service traffic goes through `api`.
pub mod api;
pub mod core;
