//! HTTP implementation of the agent backend.
//!
//! Talks to a threads/messages/runs REST API (the shape used by hosted agent
//! services). Every request carries the `api-version` query parameter and,
//! when configured, a bearer token.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::agent::backend::{AgentBackend, BackendFuture};
use crate::agent::error::{AgentError, AgentResult};
use crate::agent::ids::{ActionId, ConversationId, MessageId, RunId, WorkerId};
use crate::agent::types::{
    ActionDecision, ActionKind, Message, MessagePage, MessageRole, PageRequest, PendingAction,
    RunHandle, RunRequest, RunStatus,
};
use crate::config::BackendConfig;
use crate::worker::provisioning::WorkerSpec;
use crate::worker::resources::{ToolDefinition, ToolResources};

/// Maximum number of body bytes kept in `AgentError::Status`.
const MAX_ERROR_BODY: usize = 512;

/// Output sent back for approved function calls.
const APPROVED_OUTPUT: &str = "approved";

/// HTTP client for the agent backend.
pub struct HttpAgentBackend {
    client: reqwest::Client,
    base_url: Url,
    api_version: String,
    api_key: Option<String>,
    approval_headers: BTreeMap<String, String>,
}

impl HttpAgentBackend {
    /// Build a backend client from configuration.
    ///
    /// # Errors
    /// Returns `Unconfigured` if no endpoint is set, or an error if the
    /// endpoint is not a valid base URL or the client cannot be built.
    pub fn new(config: &BackendConfig) -> AgentResult<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .ok_or_else(|| AgentError::Unconfigured("backend endpoint is not set".to_string()))?;
        let base_url = Url::parse(endpoint)?;
        if base_url.cannot_be_a_base() {
            return Err(AgentError::Unconfigured(format!(
                "backend endpoint is not a base URL: {endpoint}"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_version: config.api_version.clone(),
            api_key: config.api_key.clone(),
            approval_headers: BTreeMap::new(),
        })
    }

    /// Headers forwarded with every external tool approval.
    #[must_use]
    pub fn with_approval_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.approval_headers = headers;
        self
    }

    /// Build an endpoint URL from path segments.
    fn endpoint(&self, segments: &[&str]) -> AgentResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                AgentError::Unconfigured("backend endpoint is not a base URL".to_string())
            })?;
            path.pop_if_empty();
            path.extend(segments);
        }
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> AgentResult<T> {
        let response = builder.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(AgentError::BackendUnavailable(format!(
                "credentials rejected ({status})"
            )));
        }
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            truncate_in_place(&mut body, MAX_ERROR_BODY);
            return Err(AgentError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

impl AgentBackend for HttpAgentBackend {
    fn create_conversation(&self) -> BackendFuture<'_, AgentResult<ConversationId>> {
        Box::pin(async move {
            let url = self.endpoint(&["threads"])?;
            let thread: IdObject = self
                .send_json(self.request(Method::POST, url).json(&serde_json::json!({})))
                .await?;
            debug!(conversation_id = %thread.id, "Created conversation");
            Ok(ConversationId::new(thread.id))
        })
    }

    fn append_message<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        role: MessageRole,
        text: &'a str,
    ) -> BackendFuture<'a, AgentResult<MessageId>> {
        Box::pin(async move {
            let url = self.endpoint(&["threads", conversation_id.as_str(), "messages"])?;
            let body = CreateMessageBody {
                role: role.as_str(),
                content: text,
            };
            let message: IdObject = self
                .send_json(self.request(Method::POST, url).json(&body))
                .await?;
            Ok(MessageId::new(message.id))
        })
    }

    fn submit_run<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        request: &'a RunRequest,
    ) -> BackendFuture<'a, AgentResult<RunHandle>> {
        Box::pin(async move {
            let url = self.endpoint(&["threads", conversation_id.as_str(), "runs"])?;
            let body = CreateRunBody {
                assistant_id: request.worker_id.as_str(),
                tool_resources: request
                    .tool_resources
                    .as_ref()
                    .filter(|resources| !resources.is_empty()),
            };
            let run: RunObject = self
                .send_json(self.request(Method::POST, url).json(&body))
                .await?;
            Ok(run.into_handle(conversation_id))
        })
    }

    fn get_run<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        run_id: &'a RunId,
    ) -> BackendFuture<'a, AgentResult<RunHandle>> {
        Box::pin(async move {
            let url = self.endpoint(&[
                "threads",
                conversation_id.as_str(),
                "runs",
                run_id.as_str(),
            ])?;
            let run: RunObject = self.send_json(self.request(Method::GET, url)).await?;
            Ok(run.into_handle(conversation_id))
        })
    }

    fn submit_action_decisions<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        run_id: &'a RunId,
        decisions: Vec<ActionDecision>,
    ) -> BackendFuture<'a, AgentResult<()>> {
        Box::pin(async move {
            let url = self.endpoint(&[
                "threads",
                conversation_id.as_str(),
                "runs",
                run_id.as_str(),
                "submit_tool_outputs",
            ])?;
            let body = build_submit_body(&decisions, &self.approval_headers);
            let _run: RunObject = self
                .send_json(self.request(Method::POST, url).json(&body))
                .await?;
            Ok(())
        })
    }

    fn cancel_run<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        run_id: &'a RunId,
    ) -> BackendFuture<'a, AgentResult<()>> {
        Box::pin(async move {
            let url = self.endpoint(&[
                "threads",
                conversation_id.as_str(),
                "runs",
                run_id.as_str(),
                "cancel",
            ])?;
            let _run: RunObject = self.send_json(self.request(Method::POST, url)).await?;
            Ok(())
        })
    }

    fn list_messages<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        page: PageRequest,
    ) -> BackendFuture<'a, AgentResult<MessagePage>> {
        Box::pin(async move {
            let mut url = self.endpoint(&["threads", conversation_id.as_str(), "messages"])?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("order", page.order.as_str());
                query.append_pair("limit", &page.limit.to_string());
                if let Some(after) = &page.after {
                    query.append_pair("after", after.as_str());
                }
            }
            let list: MessageList = self.send_json(self.request(Method::GET, url)).await?;
            list.into_page()
        })
    }

    fn create_worker<'a>(&'a self, spec: &'a WorkerSpec) -> BackendFuture<'a, AgentResult<WorkerId>> {
        Box::pin(async move {
            let url = self.endpoint(&["assistants"])?;
            let body = CreateWorkerBody {
                model: &spec.model,
                name: &spec.name,
                instructions: &spec.instructions,
                tools: &spec.tools,
            };
            let worker: IdObject = self
                .send_json(self.request(Method::POST, url).json(&body))
                .await?;
            Ok(WorkerId::new(worker.id))
        })
    }

    fn delete_worker<'a>(&'a self, worker_id: &'a WorkerId) -> BackendFuture<'a, AgentResult<()>> {
        Box::pin(async move {
            let url = self.endpoint(&["assistants", worker_id.as_str()])?;
            let _deleted: serde_json::Value =
                self.send_json(self.request(Method::DELETE, url)).await?;
            Ok(())
        })
    }
}

#[derive(Debug, Deserialize)]
struct IdObject {
    id: String,
}

#[derive(Debug, Serialize)]
struct CreateMessageBody<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateRunBody<'a> {
    assistant_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_resources: Option<&'a ToolResources>,
}

#[derive(Debug, Serialize)]
struct CreateWorkerBody<'a> {
    model: &'a str,
    name: &'a str,
    instructions: &'a str,
    #[serde(skip_serializing_if = "<[ToolDefinition]>::is_empty")]
    tools: &'a [ToolDefinition],
}

#[derive(Debug, Deserialize)]
struct RunObject {
    id: String,
    status: String,
    #[serde(default)]
    required_action: Option<RequiredAction>,
    #[serde(default)]
    last_error: Option<RunErrorObject>,
}

impl RunObject {
    fn into_handle(self, conversation_id: &ConversationId) -> RunHandle {
        let status = RunStatus::from_wire(&self.status);
        let pending_actions = if status == RunStatus::NeedsInput {
            self.required_action
                .map(RequiredAction::into_pending_actions)
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        let last_error = self.last_error.and_then(|err| match (err.code, err.message) {
            (_, Some(message)) if !message.is_empty() => Some(message),
            (Some(code), _) => Some(code),
            _ => None,
        });

        RunHandle {
            conversation_id: conversation_id.clone(),
            run_id: RunId::new(self.id),
            status,
            pending_actions,
            last_error,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RunErrorObject {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RequiredAction {
    #[serde(default)]
    submit_tool_outputs: Option<ToolCallsPayload>,
    #[serde(default)]
    submit_tool_approval: Option<ToolCallsPayload>,
}

impl RequiredAction {
    fn into_pending_actions(self) -> Vec<PendingAction> {
        self.submit_tool_approval
            .into_iter()
            .chain(self.submit_tool_outputs)
            .flat_map(|payload| payload.tool_calls)
            .map(ToolCallObject::into_pending_action)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct ToolCallsPayload {
    #[serde(default)]
    tool_calls: Vec<ToolCallObject>,
}

#[derive(Debug, Deserialize)]
struct ToolCallObject {
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
    #[serde(default)]
    server_label: Option<String>,
    #[serde(default)]
    function: Option<FunctionObject>,
}

impl ToolCallObject {
    fn into_pending_action(self) -> PendingAction {
        match self.function {
            Some(function) if self.kind != "mcp" => PendingAction {
                action_id: ActionId::new(self.id),
                kind: ActionKind::FunctionCall,
                name: function.name,
                arguments: function.arguments,
            },
            _ => PendingAction {
                action_id: ActionId::new(self.id),
                kind: ActionKind::ExternalToolCall {
                    server_label: self.server_label,
                },
                name: self.name.unwrap_or_default(),
                arguments: self.arguments.unwrap_or_default(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct FunctionObject {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    data: Vec<MessageObject>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    last_id: Option<String>,
}

impl MessageList {
    fn into_page(self) -> AgentResult<MessagePage> {
        let messages = self
            .data
            .into_iter()
            .map(MessageObject::into_message)
            .collect::<AgentResult<Vec<_>>>()?;
        let last_id = self
            .last_id
            .map(MessageId::new)
            .or_else(|| messages.last().map(|message| message.id.clone()));
        Ok(MessagePage {
            messages,
            has_more: self.has_more,
            last_id,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MessageObject {
    id: String,
    role: String,
    created_at: i64,
    #[serde(default)]
    content: Vec<ContentPart>,
}

impl MessageObject {
    fn into_message(self) -> AgentResult<Message> {
        let created_at = Utc
            .timestamp_opt(self.created_at, 0)
            .single()
            .ok_or_else(|| {
                AgentError::InvalidResponse(format!("invalid created_at: {}", self.created_at))
            })?;
        let role = if self.role == "user" {
            MessageRole::User
        } else {
            MessageRole::Agent
        };
        let content = self
            .content
            .into_iter()
            .filter_map(|part| part.text.map(|text| text.value))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Message::new(self.id, role, content, created_at))
    }
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<TextContent>,
}

#[derive(Debug, Deserialize)]
struct TextContent {
    value: String,
}

#[derive(Debug, Default, Serialize)]
struct SubmitBody {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_outputs: Vec<ToolOutput>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_approvals: Vec<ToolApproval>,
}

#[derive(Debug, Serialize)]
struct ToolOutput {
    tool_call_id: String,
    output: String,
}

#[derive(Debug, Serialize)]
struct ToolApproval {
    tool_call_id: String,
    approve: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
}

/// Split decisions into tool approvals and function outputs.
fn build_submit_body(
    decisions: &[ActionDecision],
    approval_headers: &BTreeMap<String, String>,
) -> SubmitBody {
    let mut body = SubmitBody::default();
    for decision in decisions {
        match &decision.kind {
            ActionKind::ExternalToolCall { .. } => body.tool_approvals.push(ToolApproval {
                tool_call_id: decision.action_id.to_string(),
                approve: decision.approved,
                headers: if decision.approved {
                    approval_headers.clone()
                } else {
                    BTreeMap::new()
                },
            }),
            ActionKind::FunctionCall => {
                let output = if decision.approved {
                    APPROVED_OUTPUT.to_string()
                } else {
                    format!(
                        "rejected: {}",
                        decision.reason.as_deref().unwrap_or("not allowed")
                    )
                };
                body.tool_outputs.push(ToolOutput {
                    tool_call_id: decision.action_id.to_string(),
                    output,
                });
            }
        }
    }
    body
}

fn truncate_in_place(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}
