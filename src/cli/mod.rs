pub mod backfill;
pub mod config;
pub mod job;
pub mod run;
