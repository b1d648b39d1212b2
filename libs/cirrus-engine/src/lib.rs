pub mod backup;
pub mod clock;
pub mod config;
pub mod error;
pub mod job;
pub mod progress;
pub mod retry;
pub mod topology;
