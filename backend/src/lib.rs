//! Lesion imaging corpus: parcellation registry, content-addressed
//! ingestion with parcelwise reduction, coordinate lookups, and asynchronous
//! correlation decoding.

pub mod domain;
pub mod inbound;
pub mod outbound;
pub mod server;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
