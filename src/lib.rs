//! SpendyWise background tasks — in-process task execution and periodic
//! scheduling.

pub mod config;
pub mod error;
pub mod jobs;
pub mod llm;
pub mod push;
pub mod store;
pub mod worker;
