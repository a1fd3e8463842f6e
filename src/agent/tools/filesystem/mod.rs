//! Workspace file tools. All paths go through [`WorkspaceManager`], which
//! flattens names to their final component.

use crate::agent::tools::base::{ExecutionContext, on_workspace, require_str};
use crate::agent::tools::{Tool, ToolResult};
use crate::agent::workspace::WorkspaceManager;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read a text file from the run workspace. Your own outputs take precedence over input files with the same name."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filename": {
                    "type": "string",
                    "description": "Name of the file to read"
                }
            },
            "required": ["filename"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> Result<ToolResult> {
        let filename = match require_str(&params, "filename") {
            Ok(f) => f.to_string(),
            Err(msg) => return Ok(ToolResult::error(msg)),
        };
        let read = on_workspace(&ctx.workspace, move |ws| ws.read(&filename)).await?;
        Ok(match read {
            Ok(content) => ToolResult::ok(content),
            Err(e) => ToolResult::error(e.to_string()),
        })
    }
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Save text content to a file in the run's output directory. Later agents in the run can read it."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filename": {
                    "type": "string",
                    "description": "Name of the file to create or replace"
                },
                "content": {
                    "type": "string",
                    "description": "Full file content"
                }
            },
            "required": ["filename", "content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> Result<ToolResult> {
        let filename = match require_str(&params, "filename") {
            Ok(f) => f.to_string(),
            Err(msg) => return Ok(ToolResult::error(msg)),
        };
        // Models sometimes pass structured data instead of a string
        let content = match params.get("content") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => {
                return Ok(ToolResult::error("Missing required parameter: content"));
            }
            Some(other) => serde_json::to_string_pretty(other)?,
        };
        let written =
            on_workspace(&ctx.workspace, move |ws| ws.write(&filename, content.as_bytes())).await?;
        Ok(match written {
            Ok(name) => {
                ToolResult::with_files(format!("Successfully saved to {}", name), vec![name])
            }
            Err(e) => ToolResult::error(e.to_string()),
        })
    }
}

pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &'static str {
        "list_files"
    }

    fn description(&self) -> &'static str {
        "List the run's input files and the output files written so far."
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: Value, ctx: &ExecutionContext) -> Result<ToolResult> {
        let listing = on_workspace(&ctx.workspace, WorkspaceManager::list).await?;
        Ok(match listing {
            Ok(listing) => ToolResult::ok(listing.to_string()),
            Err(e) => ToolResult::error(e.to_string()),
        })
    }
}
