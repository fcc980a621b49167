//! Lumen worker: turns uploaded lectures into study material and answers
//! questions about them.

pub mod config;
pub mod error;
pub mod extract;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod storage;
pub mod store;
pub mod worker;
