pub mod context;
pub mod delegation;
pub mod mock;
pub mod parsers;
pub mod probe;
pub mod tools;
pub mod workspace;
#[path = "loop/mod.rs"]
pub mod agent_loop;

pub use agent_loop::{AgentLoop, AgentLoopConfig, InvocationRequest, InvocationResult, Terminal};
