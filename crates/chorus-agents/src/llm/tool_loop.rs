use std::sync::Arc;

use async_trait::async_trait;
use chorus_common::{Error, Result};
use chorus_config::LlmConfig;
use futures::StreamExt;
use serde_json::json;
use tracing::{debug, warn};

use super::{LlmService, LlmServiceDeps};
use crate::context::{FileData, ImageData, ToolCall};
use crate::events;
use crate::providers::{ContentBlock, LlmProvider, LlmRequest, StreamEvent, ToolSpec};
use crate::tools::ToolOutput;

/// Text and tool calls produced by one model round trip.
#[derive(Debug, Default)]
struct AssistantTurn {
    text: String,
    tool_calls: Vec<ToolCall>,
}

/// Runs the model, executes requested tools through the tool manager and
/// feeds results back until the model answers without tool calls.
pub struct ToolLoopLlmService {
    provider: Arc<dyn LlmProvider>,
    config: LlmConfig,
    deps: LlmServiceDeps,
}

impl ToolLoopLlmService {
    pub fn new(provider: Arc<dyn LlmProvider>, config: LlmConfig, deps: LlmServiceDeps) -> Self {
        Self {
            provider,
            config,
            deps,
        }
    }

    async fn run_loop(&self, stream: bool) -> Result<String> {
        let catalog = self.deps.tools.get_all_tools().await?;
        let tool_specs: Vec<ToolSpec> = catalog.values().map(ToolSpec::from).collect();
        let system = self.config.system_prompt.clone();

        let mut full_response = String::new();
        for iteration in 0..self.config.max_iterations {
            let messages = self
                .deps
                .context
                .get_formatted_messages(system.as_deref(), &tool_specs)
                .await?;
            let request = LlmRequest {
                model: self.config.model.clone(),
                messages,
                system: system.clone(),
                max_tokens: self.config.max_output_tokens,
                temperature: self.config.temperature,
                tools: tool_specs.clone(),
            };

            debug!(
                "session '{}' iteration {iteration}: {} message(s), {} tool(s)",
                self.deps.session_id,
                request.messages.len(),
                request.tools.len()
            );
            let turn = if stream {
                self.stream_turn(&request).await?
            } else {
                self.complete_turn(&request).await?
            };

            if turn.tool_calls.is_empty() {
                self.deps
                    .context
                    .add_assistant_message(&turn.text, Vec::new())
                    .await?;
                full_response.push_str(&turn.text);
                return Ok(full_response);
            }

            self.deps
                .context
                .add_assistant_message(&turn.text, turn.tool_calls.clone())
                .await?;
            if !turn.text.is_empty() {
                full_response.push_str(&turn.text);
                full_response.push_str("\n\n");
            }

            for call in turn.tool_calls {
                let output = self.execute_tool(&call).await;
                self.deps
                    .context
                    .add_tool_result(&call.id, &call.name, &output)
                    .await?;
            }
        }

        Err(Error::Agent(format!(
            "tool loop exceeded maximum of {} iterations",
            self.config.max_iterations
        )))
    }

    /// Tool failures are reported back to the model rather than ending the turn.
    async fn execute_tool(&self, call: &ToolCall) -> ToolOutput {
        self.emit(
            events::TOOL_CALL,
            json!({ "toolName": call.name, "args": call.arguments, "callId": call.id }),
        );
        let output = match self
            .deps
            .tools
            .execute_tool(
                &call.name,
                call.arguments.clone(),
                Some(&self.deps.session_id),
            )
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!("tool '{}' failed: {e}", call.name);
                ToolOutput::error(e.to_string())
            }
        };
        self.emit(
            events::TOOL_RESULT,
            json!({
                "toolName": call.name,
                "callId": call.id,
                "success": !output.is_error,
                "result": output.content,
            }),
        );
        output
    }

    async fn complete_turn(&self, request: &LlmRequest) -> Result<AssistantTurn> {
        let response = self.provider.complete(request).await?;
        let tool_calls = response
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: input.clone(),
                }),
                _ => None,
            })
            .collect();
        Ok(AssistantTurn {
            text: response.text(),
            tool_calls,
        })
    }

    /// Try streaming; fall back to non-streaming if the provider refuses.
    async fn stream_turn(&self, request: &LlmRequest) -> Result<AssistantTurn> {
        let mut stream = match self.provider.stream_complete(request).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    "streaming failed for provider '{}', falling back to non-streaming: {e}",
                    self.provider.provider_id()
                );
                let turn = self.complete_turn(request).await?;
                if !turn.text.is_empty() {
                    self.emit(events::CHUNK, json!({ "content": turn.text }));
                }
                return Ok(turn);
            }
        };

        let mut turn = AssistantTurn::default();
        let mut current_tool: Option<(String, String, String)> = None;
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::TextDelta(text) => {
                    self.emit(events::CHUNK, json!({ "content": text }));
                    turn.text.push_str(&text);
                }
                StreamEvent::ToolUseStart { id, name, .. } => {
                    current_tool = Some((id, name, String::new()));
                }
                StreamEvent::InputJsonDelta(partial) => {
                    if let Some((_, _, input)) = current_tool.as_mut() {
                        input.push_str(&partial);
                    }
                }
                StreamEvent::ContentBlockStop { .. } => {
                    if let Some((id, name, input)) = current_tool.take() {
                        turn.tool_calls.push(ToolCall {
                            id,
                            name,
                            arguments: parse_tool_input(&input),
                        });
                    }
                }
                StreamEvent::MessageDelta { .. } => {}
                StreamEvent::MessageStop => break,
            }
        }
        Ok(turn)
    }

    fn emit(&self, event: &str, payload: serde_json::Value) {
        self.deps.events.emit(event, payload);
    }
}

fn parse_tool_input(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!("discarding malformed tool input: {e}");
        json!({})
    })
}

#[async_trait]
impl LlmService for ToolLoopLlmService {
    async fn complete_task(
        &self,
        input: &str,
        image: Option<ImageData>,
        file: Option<FileData>,
        stream: bool,
    ) -> Result<String> {
        self.emit(events::THINKING, json!({}));
        self.deps.context.add_user_message(input, image, file).await?;

        match self.run_loop(stream).await {
            Ok(text) => {
                self.emit(
                    events::RESPONSE,
                    json!({ "content": text, "model": self.config.model }),
                );
                Ok(text)
            }
            Err(e) => {
                self.emit(events::ERROR, json!({ "message": e.to_string() }));
                Err(e)
            }
        }
    }

    fn config(&self) -> &LlmConfig {
        &self.config
    }
}
