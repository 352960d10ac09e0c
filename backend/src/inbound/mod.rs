//! Inbound adapters that translate external requests into domain service
//! calls while keeping framework details at the edge.
//!
//! HTTP handlers live under [`http`]; the operator command-line tools in
//! `src/bin` call the domain services directly.

pub mod http;
