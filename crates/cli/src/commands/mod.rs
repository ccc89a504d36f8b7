//! Subcommand implementations, one module per API area

pub mod aws;
pub mod k8s;
pub mod services;
