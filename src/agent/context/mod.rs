//! Request preparation for a single model call.
//!
//! The system instruction is layered: runtime rules (identity, output
//! discipline, tool-call protocol), then the delegation addendum, then the
//! graph view, then the persona. Later layers may refine guidance but the
//! protocol section comes first and is restated as binding.

pub mod attachments;

use crate::agent::agent_loop::InvocationRequest;
use crate::agent::delegation::{GraphView, IdentityPrefix, RESERVED_PREFIX};
use crate::agent::tools::{ToolDispatcher, render_tool_definitions};
use crate::config::ContextConfig;
use crate::providers::{ChatRequest, ContextCache, Message, Part};
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const CONTINUITY_ACK: &str = "Previous context acknowledged. Continuing reasoning chain.";
pub const READY_TRIGGER: &str = "[SYSTEM: Ready. Begin your assigned task.]";

const MIN_THINKING_BUDGET: u32 = 1000;
const MAX_THINKING_BUDGET: u32 = 10_000;

/// Thinking tokens granted for a 1-10 style thinking level.
pub fn thinking_budget(level: u32) -> u32 {
    level
        .saturating_mul(1000)
        .clamp(MIN_THINKING_BUDGET, MAX_THINKING_BUDGET)
}

fn base_rules(agent_id: &str, tool_definitions: &[Value]) -> String {
    let mut rules = format!(
        "# RUNTIME RULES\n\
         You are agent `{}` running inside an automated workflow. Nobody is chatting \
         with you: do not greet, ask questions or offer follow-ups. Produce the work \
         product your task asks for.\n",
        agent_id
    );

    if tool_definitions.is_empty() {
        rules.push_str(
            "\nNo tools are available for this task. Answer from the provided context.\n",
        );
        return rules;
    }

    let _ = write!(
        rules,
        "\n# TOOL PROTOCOL (binding)\n\
         Native function calling is disabled. To call a tool, emit a fenced block tagged \
         `json:function` whose body is a single JSON object:\n\n\
         ```json:function\n\
         {{\"name\": \"<tool>\", \"args\": {{...}}}}\n\
         ```\n\n\
         You may emit several blocks in one response; they run in order and their \
         results come back in the next message as `[TOOL RESULT: <tool>]` sections. \
         Escape backslashes and quotes inside JSON strings. When you have everything you \
         need, answer WITHOUT any function block; that response is your final output.\n\n\
         Available tools:\n{}\n",
        render_tool_definitions(tool_definitions)
    );
    rules
}

fn delegation_addendum() -> String {
    let prefixes = IdentityPrefix::ALL
        .iter()
        .map(|p| format!("`{}`", p.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "# DYNAMIC DELEGATION\n\
         If the task is too large, is missing data or needs specialised sub-tasks, you may \
         spawn sub-agents by emitting ONE block tagged `json:delegation`:\n\n\
         ```json:delegation\n\
         {{\"reason\": \"...\", \"strategy\": \"child\", \
         \"new_nodes\": [{{\"id\": \"research_topic\", \"role\": \"worker\", \"prompt\": \"...\", \
         \"tools\": [\"web_search\"], \"depends_on\": []}}], \"prune_nodes\": []}}\n\
         ```\n\n\
         Node ids must start with one of {}. Ids starting with `{}` are reserved. \
         Reusing the id of a pending node overwrites it in place; only pending nodes may \
         be pruned. The scheduler runs the new nodes and returns their results to you.",
        prefixes, RESERVED_PREFIX
    )
}

fn graph_addendum(graph: &GraphView) -> String {
    format!(
        "# WORKFLOW GRAPH\n\
         Current nodes (id [status] <- dependencies):\n{}",
        graph.render()
    )
}

/// Assemble the layered system instruction.
pub fn build_system_instruction(
    agent_id: &str,
    tool_definitions: &[Value],
    delegation_allowed: bool,
    graph: Option<&GraphView>,
    persona: Option<&str>,
) -> String {
    let mut layers = vec![base_rules(agent_id, tool_definitions)];
    if delegation_allowed {
        layers.push(delegation_addendum());
    }
    if let Some(graph) = graph.filter(|g| !g.nodes.is_empty()) {
        layers.push(graph_addendum(graph));
    }
    if let Some(persona) = persona.map(str::trim).filter(|p| !p.is_empty()) {
        layers.push(format!("# YOUR ROLE\n{}", persona));
    }
    layers.join("\n\n")
}

enum CacheAttachment {
    None,
    Created(String),
    Reused(String),
}

/// Everything the invocation loop needs to issue model calls.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub model: String,
    pub system_instruction: String,
    pub conversation: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub thinking_budget: Option<u32>,
    /// Cache entry attached to every call of this invocation.
    pub active_cache_ref: Option<String>,
}

impl PreparedRequest {
    /// A model call over `messages`, which start with [`Self::conversation`]
    /// and grow as the invocation proceeds.
    pub fn chat_request(&self, messages: Vec<Message>) -> ChatRequest<'_> {
        ChatRequest {
            messages,
            system_instruction: Some(self.system_instruction.clone()),
            model: Some(&self.model),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            thinking_budget: self.thinking_budget,
            cached_content: self.active_cache_ref.clone(),
        }
    }

    /// Text of the last user turn, binary parts omitted.
    pub fn final_user_message(&self) -> String {
        self.conversation
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(Message::text)
            .unwrap_or_default()
    }
}

pub struct RequestBuilder {
    dispatcher: Arc<dyn ToolDispatcher>,
    cache: Option<Arc<dyn ContextCache>>,
    config: ContextConfig,
    temperature: f32,
    max_output_tokens: Option<u32>,
}

impl RequestBuilder {
    pub fn new(dispatcher: Arc<dyn ToolDispatcher>, config: ContextConfig) -> Self {
        Self {
            dispatcher,
            cache: None,
            config,
            temperature: 1.0,
            max_output_tokens: None,
        }
    }

    pub fn with_cache(mut self, cache: Option<Arc<dyn ContextCache>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_generation(mut self, temperature: f32, max_output_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Build the conversation for `req` against the concrete `model`.
    pub async fn prepare(&self, req: &InvocationRequest, model: &str) -> PreparedRequest {
        let agent_id = req.agent_label();
        let definitions = self.dispatcher.definitions(&req.tools);
        let system_instruction = build_system_instruction(
            agent_id,
            &definitions,
            req.allow_delegation,
            req.graph_view.as_ref(),
            req.persona_prompt.as_deref(),
        );

        let mut conversation = Vec::new();
        if let Some(sig) = req.parent_signature.as_deref().filter(|s| !s.is_empty()) {
            conversation.push(Message::user(format!(
                "[CONTEXT CONTINUITY]\nPrevious Agent Signature: {}",
                sig
            )));
            conversation.push(Message::model(CONTINUITY_ACK));
        }

        let (file_parts, attachment) = self.attach_files(req, model, &system_instruction).await;
        let mut user_parts = file_parts;
        let active_cache_ref = match attachment {
            CacheAttachment::None => None,
            CacheAttachment::Created(name) => Some(name),
            CacheAttachment::Reused(name) => {
                // The reused entry holds another call's instruction, so this
                // agent's own goes into the turn
                user_parts.push(Part::text(format!(
                    "[SYSTEM INSTRUCTION]\n{}\n\n",
                    system_instruction
                )));
                Some(name)
            }
        };

        if let Some(data) = req.context_data.as_ref().filter(|d| !d.is_null()) {
            let rendered =
                serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
            user_parts.push(Part::text(format!("[CONTEXT DATA]\n{}\n\n", rendered)));
        }
        if let Some(directive) = req
            .operator_directive
            .as_deref()
            .filter(|d| !d.trim().is_empty())
        {
            user_parts.push(Part::text(format!("[OPERATOR DIRECTIVE]\n{}", directive)));
        }
        if user_parts.is_empty() {
            user_parts.push(Part::text(READY_TRIGGER));
        }
        conversation.push(Message::user_parts(user_parts));

        let thinking_budget = req.thinking_level.map(thinking_budget);
        if let Some(budget) = thinking_budget {
            debug!("Thinking enabled for {}: budget={}", agent_id, budget);
        }

        PreparedRequest {
            model: model.to_string(),
            system_instruction,
            conversation,
            temperature: self.temperature,
            max_tokens: self.max_output_tokens,
            thinking_budget,
            active_cache_ref,
        }
    }

    /// File parts to inline, plus the cache reference to attach instead (if any).
    async fn attach_files(
        &self,
        req: &InvocationRequest,
        model: &str,
        system_instruction: &str,
    ) -> (Vec<Part>, CacheAttachment) {
        if let Some(existing) = req.cached_content_id.as_deref().filter(|c| !c.is_empty()) {
            debug!("Reusing context cache {}", existing);
            return (Vec::new(), CacheAttachment::Reused(existing.to_string()));
        }
        if req.file_paths.is_empty() {
            return (Vec::new(), CacheAttachment::None);
        }

        let inline_limit = self.config.inline_text_limit_chars;
        let volume = attachments::estimate_volume(&req.file_paths).await;
        if volume > self.config.cache_threshold_chars
            && let Some(cache) = &self.cache
        {
            let parts = attachments::load_all(&req.file_paths, inline_limit).await;
            let ttl = Duration::from_secs(self.config.cache_ttl_secs);
            match cache.create(model, system_instruction, parts.clone(), ttl).await {
                Ok(name) => {
                    info!(
                        "Cached {} attachment(s) (~{} chars) as {}",
                        req.file_paths.len(),
                        volume,
                        name
                    );
                    return (Vec::new(), CacheAttachment::Created(name));
                }
                Err(e) => {
                    warn!("Context cache creation failed, inlining files: {}", e);
                    return (parts, CacheAttachment::None);
                }
            }
        }

        (
            attachments::load_all(&req.file_paths, inline_limit).await,
            CacheAttachment::None,
        )
    }
}

#[cfg(test)]
mod tests;
