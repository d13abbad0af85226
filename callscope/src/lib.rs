// Expose modules for testing
pub mod analysis;
pub mod cli;
pub mod domain;
pub mod report;
pub mod symbolization;
pub mod trace_data;
