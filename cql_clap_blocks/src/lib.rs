//! Building blocks for [`clap`]-driven CLI configuration of CQL clients.

pub mod execution;
