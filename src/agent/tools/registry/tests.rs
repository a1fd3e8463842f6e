use super::*;
use serde_json::json;

struct PanicTool;

#[async_trait]
impl Tool for PanicTool {
    fn name(&self) -> &str {
        "panicky"
    }
    fn description(&self) -> &str {
        "always panics"
    }
    fn parameters(&self) -> Value {
        json!({})
    }
    async fn execute(&self, _params: Value, _ctx: &ExecutionContext) -> anyhow::Result<ToolResult> {
        panic!("kaboom");
    }
}

struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }
    fn description(&self) -> &str {
        "sleeps"
    }
    fn parameters(&self) -> Value {
        json!({})
    }
    fn execution_timeout(&self) -> Option<Duration> {
        Some(Duration::from_millis(50))
    }
    async fn execute(&self, _params: Value, _ctx: &ExecutionContext) -> anyhow::Result<ToolResult> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(ToolResult::ok("late"))
    }
}

struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing"
    }
    fn description(&self) -> &str {
        "returns Err"
    }
    fn parameters(&self) -> Value {
        json!({})
    }
    async fn execute(&self, _params: Value, _ctx: &ExecutionContext) -> anyhow::Result<ToolResult> {
        anyhow::bail!("disk on fire")
    }
}

fn registry(dir: &tempfile::TempDir) -> ToolRegistry {
    let mut registry = ToolRegistry::new(dir.path());
    registry.register(Arc::new(ReadFileTool));
    registry.register(Arc::new(WriteFileTool));
    registry.register(Arc::new(ListFilesTool));
    registry
}

#[tokio::test]
async fn unknown_tool_names_valid_tools() {
    let dir = tempfile::tempdir().unwrap();
    let result = registry(&dir)
        .dispatch("nonexistent_tool", json!({}), "run1")
        .await;
    assert_eq!(
        result,
        ToolResult::error(
            "Unknown tool: nonexistent_tool. Valid tools: [\"list_files\", \"read_file\", \"write_file\"]"
        )
    );
}

#[tokio::test]
async fn dispatch_scopes_to_run_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(&dir);
    let written = registry
        .dispatch("write_file", json!({"filename": "a.txt", "content": "hi"}), "runA")
        .await;
    assert_eq!(written.files_generated(), ["a.txt".to_string()]);
    assert!(dir.path().join("sessions/runA/output/a.txt").exists());

    let other_run = registry
        .dispatch("read_file", json!({"filename": "a.txt"}), "runB")
        .await;
    assert!(!other_run.is_success());
}

#[tokio::test]
async fn panics_become_errors() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = registry(&dir);
    registry.register(Arc::new(PanicTool));
    let result = registry.dispatch("panicky", json!({}), "r").await;
    assert_eq!(result, ToolResult::error("Tool 'panicky' crashed: kaboom"));
}

#[tokio::test]
async fn timeouts_become_errors() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = registry(&dir);
    registry.register(Arc::new(SlowTool));
    let result = registry.dispatch("slow", json!({}), "r").await;
    assert_eq!(result, ToolResult::error("Tool 'slow' timed out after 0s"));
}

#[tokio::test]
async fn tool_errors_become_results() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = registry(&dir);
    registry.register(Arc::new(FailingTool));
    let result = registry.dispatch("failing", json!({}), "r").await;
    assert_eq!(result, ToolResult::error("Tool 'failing' failed: disk on fire"));
}

#[test]
fn definitions_follow_request_order_and_skip_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let defs = registry(&dir).definitions(&[
        "write_file".into(),
        "bogus".into(),
        "read_file".into(),
    ]);
    let names: Vec<_> = defs.iter().map(|d| d["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["write_file", "read_file"]);
    assert_eq!(defs[0]["parameters"]["required"], json!(["filename", "content"]));
}

#[test]
fn render_is_pretty_json_array() {
    let rendered = render_tool_definitions(&[json!({"name": "list_files"})]);
    assert_eq!(rendered, "[\n  {\n    \"name\": \"list_files\"\n  }\n]");
    assert_eq!(render_tool_definitions(&[]), "[]");
}

#[test]
fn standard_registers_builtin_tools() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.workspace.base_dir = dir.path().to_string_lossy().into_owned();
    let registry = ToolRegistry::standard(&config).unwrap();
    assert_eq!(
        registry.tool_names(),
        vec!["execute_python", "list_files", "read_file", "web_search", "write_file"]
    );
}

#[test]
fn invalid_names_are_rejected() {
    struct Nameless;
    #[async_trait]
    impl Tool for Nameless {
        fn name(&self) -> &str {
            ""
        }
        fn description(&self) -> &str {
            ""
        }
        fn parameters(&self) -> Value {
            json!({})
        }
        async fn execute(&self, _p: Value, _c: &ExecutionContext) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::ok(""))
        }
    }
    let dir = tempfile::tempdir().unwrap();
    let mut registry = registry(&dir);
    registry.register(Arc::new(Nameless));
    assert_eq!(registry.tool_names().len(), 3);
}
