//! Test support for the CQL client: an in-memory cluster that speaks enough CQL to run
//! schema, batch, paging and metadata scenarios end to end without a server.

mod cluster;
mod parse;

pub use cluster::MemoryCluster;
