//! Shared plumbing for the `ybox-*` front-end binaries: logger setup, XDG
//! config/data discovery, signal wiring, and exit-code mapping. The library
//! crate proper (`ybox`) never touches any of this — it stays a CLI-layer
//! concern, same as this codebase's original front-end split.

pub mod common;
pub mod logger;
