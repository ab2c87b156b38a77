pub mod cli;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod pool;
pub mod postprocess;
pub mod queue;
pub mod report;
pub mod service;
pub mod util;
