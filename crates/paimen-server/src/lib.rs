//! Server-side wiring for the Paimen control plane: the warp route tree and
//! its error mapping. The binary in `main.rs` assembles the runtime pieces
//! and serves these routes.

pub mod api;
