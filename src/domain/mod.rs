pub mod classifier;
pub mod dashboard;
pub mod interval;
pub mod job_runner;
pub mod jobs;
pub mod records;
pub mod types;
