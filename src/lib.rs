pub mod backfill;
pub mod cli;
pub mod config;
pub mod naming;
pub mod remote;
pub mod rotation;
pub mod upload;
