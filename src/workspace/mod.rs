//! Workspace subsystem — everything that touches an owner's directory tree.
//!
//! | Module  | Responsibility                                              |
//! |---------|-------------------------------------------------------------|
//! | `paths` | Owner-folder naming and the `safe_join` path sandbox        |
//! | `files` | Bounded, text-only read/write of workspace files            |
//! | `tree`  | Bounded-depth directory enumeration                         |
//! | `setup` | Clear + shallow-clone pipeline with per-owner exclusion     |
//! | `watch` | Batched filesystem change notifications                     |
//!
//! Every user-supplied path is routed through [`paths::safe_join`]; nothing
//! in this subsystem touches a path outside the session's workspace root.

pub mod files;
pub mod paths;
pub mod setup;
pub mod tree;
pub mod watch;
