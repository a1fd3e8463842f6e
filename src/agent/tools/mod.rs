pub mod base;
pub mod filesystem;
pub mod registry;
pub mod sandbox;
pub mod web;

pub use base::{ExecutionContext, NoToolsDispatcher, Tool, ToolDispatcher, ToolResult};
pub use registry::{ToolRegistry, render_tool_definitions};
