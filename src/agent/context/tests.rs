use super::attachments::{AttachmentKind, classify};
use super::*;
use crate::agent::delegation::{GraphNode, NodeStatus};
use crate::agent::tools::{NoToolsDispatcher, ToolResult};
use crate::agent::workspace::TRUNCATION_MARKER;
use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::sync::Mutex;

struct SchemaOnlyDispatcher;

#[async_trait]
impl ToolDispatcher for SchemaOnlyDispatcher {
    async fn dispatch(&self, name: &str, _args: Value, _run_id: &str) -> ToolResult {
        ToolResult::error(format!("Unknown tool: {}", name))
    }

    fn definitions(&self, names: &[String]) -> Vec<Value> {
        names
            .iter()
            .filter(|n| n.as_str() == "web_search")
            .map(|n| json!({"name": n, "description": "Search the web", "parameters": {}}))
            .collect()
    }
}

#[derive(Default)]
struct RecordingCache {
    fail: bool,
    calls: Mutex<Vec<(String, usize, Duration)>>,
    instructions: Mutex<Vec<String>>,
}

#[async_trait]
impl ContextCache for RecordingCache {
    async fn create(
        &self,
        model: &str,
        system_instruction: &str,
        parts: Vec<Part>,
        ttl: Duration,
    ) -> anyhow::Result<String> {
        self.instructions
            .lock()
            .unwrap()
            .push(system_instruction.to_string());
        self.calls
            .lock()
            .unwrap()
            .push((model.to_string(), parts.len(), ttl));
        if self.fail {
            anyhow::bail!("cache backend down");
        }
        Ok("cachedContents/test".into())
    }
}

fn builder() -> RequestBuilder {
    RequestBuilder::new(Arc::new(NoToolsDispatcher), ContextConfig::default())
}

fn request() -> InvocationRequest {
    InvocationRequest {
        run_id: "run1".into(),
        agent_id: Some("analyze_1".into()),
        model: "fast".into(),
        ..Default::default()
    }
}

fn user_texts(prepared: &PreparedRequest) -> Vec<String> {
    prepared
        .conversation
        .last()
        .unwrap()
        .parts
        .iter()
        .filter_map(|p| p.as_text().map(str::to_string))
        .collect()
}

#[test]
fn thinking_budget_is_clamped() {
    assert_eq!(thinking_budget(0), 1000);
    assert_eq!(thinking_budget(1), 1000);
    assert_eq!(thinking_budget(4), 4000);
    assert_eq!(thinking_budget(10), 10_000);
    assert_eq!(thinking_budget(50), 10_000);
    assert_eq!(thinking_budget(u32::MAX), 10_000);
}

#[test]
fn system_instruction_layers_in_order() {
    let defs = vec![json!({"name": "web_search", "description": "d", "parameters": {}})];
    let graph = GraphView {
        nodes: vec![GraphNode {
            id: "research_1".into(),
            status: NodeStatus::Pending,
            depends_on: vec![],
        }],
    };
    let text = build_system_instruction(
        "coder_1",
        &defs,
        true,
        Some(&graph),
        Some("You are a careful analyst."),
    );

    let rules = text.find("# RUNTIME RULES").unwrap();
    let protocol = text.find("# TOOL PROTOCOL").unwrap();
    let delegation = text.find("# DYNAMIC DELEGATION").unwrap();
    let graph_pos = text.find("# WORKFLOW GRAPH").unwrap();
    let persona = text.find("You are a careful analyst.").unwrap();
    assert!(rules < protocol && protocol < delegation);
    assert!(delegation < graph_pos && graph_pos < persona);
    assert!(text.contains("`coder_1`"));
    assert!(text.contains("\"web_search\""));
    assert!(text.contains("- research_1 [pending]"));
    assert!(text.contains("`research_`"));
    assert!(text.contains("`master_`"));
}

#[test]
fn system_instruction_without_tools_or_extras() {
    let text = build_system_instruction("a", &[], false, Some(&GraphView::default()), Some("  "));
    assert!(text.contains("No tools are available"));
    assert!(!text.contains("json:function"));
    assert!(!text.contains("DYNAMIC DELEGATION"));
    assert!(!text.contains("WORKFLOW GRAPH"));
    assert!(!text.contains("YOUR ROLE"));
}

#[tokio::test]
async fn empty_request_gets_ready_trigger() {
    let prepared = builder().prepare(&request(), "gemini-2.0-flash").await;
    assert_eq!(prepared.conversation.len(), 1);
    assert_eq!(user_texts(&prepared), vec![READY_TRIGGER.to_string()]);
    assert_eq!(prepared.model, "gemini-2.0-flash");
    assert!(prepared.thinking_budget.is_none());
    assert!(prepared.active_cache_ref.is_none());
}

#[tokio::test]
async fn parent_signature_prepends_continuity_turns() {
    let mut req = request();
    req.parent_signature = Some("c2lnbmF0dXJl".into());
    req.operator_directive = Some("Summarize.".into());
    let prepared = builder().prepare(&req, "m").await;

    assert_eq!(prepared.conversation.len(), 3);
    assert_eq!(prepared.conversation[0].role, "user");
    assert_eq!(
        prepared.conversation[0].text(),
        "[CONTEXT CONTINUITY]\nPrevious Agent Signature: c2lnbmF0dXJl"
    );
    assert_eq!(prepared.conversation[1].role, "model");
    assert_eq!(prepared.conversation[1].text(), CONTINUITY_ACK);
    assert_eq!(prepared.final_user_message(), "[OPERATOR DIRECTIVE]\nSummarize.");
}

#[tokio::test]
async fn context_data_precedes_directive() {
    let mut req = request();
    req.context_data = Some(json!({"upstream": {"result": 42}}));
    req.operator_directive = Some("Use the upstream result.".into());
    req.thinking_level = Some(3);
    let prepared = builder()
        .with_generation(0.4, Some(2048))
        .prepare(&req, "m")
        .await;

    let texts = user_texts(&prepared);
    assert_eq!(texts.len(), 2);
    assert!(texts[0].starts_with("[CONTEXT DATA]\n{\n  \"upstream\""));
    assert!(texts[0].ends_with("\n\n"));
    assert_eq!(texts[1], "[OPERATOR DIRECTIVE]\nUse the upstream result.");
    assert_eq!(prepared.thinking_budget, Some(3000));
    assert!((prepared.temperature - 0.4).abs() < f32::EPSILON);
    assert_eq!(prepared.max_tokens, Some(2048));
}

#[tokio::test]
async fn tool_definitions_come_from_dispatcher() {
    let mut req = request();
    req.tools = vec!["web_search".into(), "no_such_tool".into()];
    let prepared = RequestBuilder::new(Arc::new(SchemaOnlyDispatcher), ContextConfig::default())
        .prepare(&req, "m")
        .await;
    assert!(prepared.system_instruction.contains("# TOOL PROTOCOL"));
    assert!(prepared.system_instruction.contains("Search the web"));
    assert!(!prepared.system_instruction.contains("no_such_tool"));
}

#[tokio::test]
async fn files_are_inlined_or_encoded() {
    let dir = tempfile::tempdir().unwrap();
    let notes = dir.path().join("notes.md");
    std::fs::write(&notes, "# Findings\nall good").unwrap();
    let image = dir.path().join("chart.png");
    std::fs::write(&image, [0x89, b'P', b'N', b'G', 0, 1, 2]).unwrap();
    let missing = dir.path().join("gone.csv");

    let mut req = request();
    req.file_paths = vec![
        notes.display().to_string(),
        image.display().to_string(),
        missing.display().to_string(),
    ];
    let prepared = builder().prepare(&req, "m").await;
    let parts = &prepared.conversation[0].parts;
    assert_eq!(parts.len(), 3);

    let inlined = parts[0].as_text().unwrap();
    assert!(inlined.starts_with("[FILE: notes.md]\n# Findings"));
    assert!(inlined.ends_with("[END FILE: notes.md]"));
    match &parts[1] {
        Part::InlineData { mime_type, data } => {
            assert_eq!(mime_type, "image/png");
            assert_eq!(data, "iVBORwABAg==");
        }
        other => panic!("expected inline data, got {:?}", other),
    }
    assert_eq!(
        parts[2].as_text().unwrap(),
        format!("[ERROR: Failed to load {}]", missing.display())
    );
}

#[tokio::test]
async fn long_text_file_is_truncated() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("run.log");
    std::fs::write(&log, "x".repeat(500)).unwrap();

    let config = ContextConfig {
        inline_text_limit_chars: 100,
        ..ContextConfig::default()
    };
    let mut req = request();
    req.file_paths = vec![log.display().to_string()];
    let prepared = RequestBuilder::new(Arc::new(NoToolsDispatcher), config)
        .prepare(&req, "m")
        .await;
    let text = prepared.conversation[0].parts[0].as_text().unwrap();
    assert!(text.contains(TRUNCATION_MARKER));
    assert!(text.len() < 200);
}

fn big_file(dir: &Path) -> String {
    let path = dir.join("corpus.txt");
    std::fs::write(&path, "y".repeat(2_000)).unwrap();
    path.display().to_string()
}

#[tokio::test]
async fn large_attachments_go_to_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(RecordingCache::default());
    let config = ContextConfig {
        cache_threshold_chars: 1_000,
        cache_ttl_secs: 120,
        ..ContextConfig::default()
    };
    let mut req = request();
    req.file_paths = vec![big_file(dir.path())];
    req.operator_directive = Some("Analyze the corpus.".into());

    let prepared = RequestBuilder::new(Arc::new(NoToolsDispatcher), config)
        .with_cache(Some(cache.clone()))
        .prepare(&req, "gemini-2.0-flash")
        .await;

    assert_eq!(
        prepared.active_cache_ref.as_deref(),
        Some("cachedContents/test")
    );
    assert_eq!(user_texts(&prepared), vec!["[OPERATOR DIRECTIVE]\nAnalyze the corpus."]);
    let calls = cache.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "gemini-2.0-flash");
    assert_eq!(calls[0].1, 1);
    assert_eq!(calls[0].2, Duration::from_secs(120));
    drop(calls);
    assert_eq!(
        *cache.instructions.lock().unwrap(),
        vec![prepared.system_instruction.clone()]
    );
    assert_eq!(
        prepared
            .chat_request(prepared.conversation.clone())
            .cached_content
            .as_deref(),
        Some("cachedContents/test")
    );
}

#[tokio::test]
async fn cache_failure_falls_back_to_inline() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(RecordingCache {
        fail: true,
        ..Default::default()
    });
    let config = ContextConfig {
        cache_threshold_chars: 1_000,
        ..ContextConfig::default()
    };
    let mut req = request();
    req.file_paths = vec![big_file(dir.path())];

    let prepared = RequestBuilder::new(Arc::new(NoToolsDispatcher), config)
        .with_cache(Some(cache.clone()))
        .prepare(&req, "m")
        .await;
    assert!(prepared.active_cache_ref.is_none());
    assert_eq!(cache.calls.lock().unwrap().len(), 1);
    assert!(user_texts(&prepared)[0].starts_with("[FILE: corpus.txt]"));
}

#[tokio::test]
async fn small_attachments_skip_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(RecordingCache::default());
    let mut req = request();
    req.file_paths = vec![big_file(dir.path())];
    let prepared = builder()
        .with_cache(Some(cache.clone()))
        .prepare(&req, "m")
        .await;
    assert!(prepared.active_cache_ref.is_none());
    assert!(cache.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn caller_cache_id_skips_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut req = request();
    req.file_paths = vec![big_file(dir.path())];
    req.cached_content_id = Some("cachedContents/prior".into());
    let prepared = builder().prepare(&req, "m").await;
    assert_eq!(
        prepared.active_cache_ref.as_deref(),
        Some("cachedContents/prior")
    );
    // The prior entry holds someone else's instruction, so ours rides in the turn
    assert_eq!(
        user_texts(&prepared),
        vec![format!("[SYSTEM INSTRUCTION]\n{}\n\n", prepared.system_instruction)]
    );
}

#[test]
fn classification_sniffs_unknown_extensions() {
    assert_eq!(classify(Path::new("a.py"), &[0xff]), AttachmentKind::Text);
    assert_eq!(
        classify(Path::new("scan.PDF"), b"%PDF"),
        AttachmentKind::Binary {
            mime_type: "application/pdf"
        }
    );
    assert_eq!(classify(Path::new("README"), b"plain words"), AttachmentKind::Text);
    assert_eq!(
        classify(Path::new("blob.bin"), &[0, 159, 146, 150]),
        AttachmentKind::Binary {
            mime_type: "application/octet-stream"
        }
    );
}
