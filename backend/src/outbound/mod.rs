//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! This module follows the hexagonal architecture pattern, providing concrete
//! implementations of domain port traits for each infrastructure concern:
//!
//! - **persistence**: PostgreSQL-backed repositories and task store using Diesel
//! - **storage**: filesystem blob store rooted in a `cap_std` directory
//! - **imaging**: NIfTI and `.npy` codecs
//! - **mapper**: connectivity mapping from precomputed connectome chunks
//! - **queue**: in-process reduction queues
//!
//! Adapters are thin translators that convert between domain types and
//! infrastructure-specific representations. They contain no business logic.

pub mod imaging;
pub mod mapper;
pub mod persistence;
pub mod queue;
pub mod storage;
