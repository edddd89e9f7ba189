//! Scripted in-process backend for tests.
#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

use crate::agent::backend::{AgentBackend, BackendFuture};
use crate::agent::error::{AgentError, AgentResult};
use crate::agent::ids::{ActionId, ConversationId, MessageId, RunId, WorkerId};
use crate::agent::types::{
    ActionDecision, ActionKind, ListOrder, Message, MessagePage, MessageRole, PageRequest,
    PendingAction, RunHandle, RunRequest, RunStatus,
};
use crate::worker::provisioning::WorkerSpec;

/// One scripted answer to `get_run`.
#[derive(Clone, Debug)]
pub enum Step {
    /// Report a plain status.
    Status(RunStatus),
    /// Report `NeedsInput` with these actions.
    NeedsInput(Vec<PendingAction>),
    /// Report `Failed` with this detail.
    Fail(String),
}

/// Number of calls per backend operation.
#[derive(Clone, Copy, Debug, Default)]
pub struct CallCounts {
    pub create_conversation: usize,
    pub append_message: usize,
    pub submit_run: usize,
    pub get_run: usize,
    pub submit_decisions: usize,
    pub cancel_run: usize,
    pub list_messages: usize,
    pub create_worker: usize,
    pub delete_worker: usize,
}

struct RunScript {
    steps: VecDeque<Step>,
    reply: Option<String>,
}

struct ActiveRun {
    conversation_id: ConversationId,
    script: RunScript,
    last: Step,
    finished: bool,
}

#[derive(Default)]
struct FakeState {
    calls: CallCounts,
    queued_runs: VecDeque<RunScript>,
    runs: HashMap<RunId, ActiveRun>,
    messages: HashMap<ConversationId, Vec<Message>>,
    decisions: Vec<Vec<ActionDecision>>,
    next_id: u64,
    clock_seconds: i64,
    failing_decision_submits: usize,
    failing_status_code: Option<u16>,
    fail_list: bool,
    fail_create: bool,
    raw_listing: bool,
    active_runs: usize,
    max_active_runs: usize,
}

impl FakeState {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{}", self.next_id)
    }

    fn tick(&mut self) -> DateTime<Utc> {
        self.clock_seconds += 1;
        base_time() + ChronoDuration::seconds(self.clock_seconds)
    }

    fn push_message(&mut self, conversation_id: &ConversationId, role: MessageRole, text: &str) {
        let id = self.next("msg");
        let at = self.tick();
        self.messages
            .entry(conversation_id.clone())
            .or_default()
            .push(Message::new(id, role, text, at));
    }
}

/// Fixed origin for fake timestamps.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

/// Build a pending external tool call.
pub fn tool_call(id: &str, name: &str, arguments: &str) -> PendingAction {
    PendingAction {
        action_id: ActionId::new(id),
        kind: ActionKind::ExternalToolCall {
            server_label: Some("inventory_mcp".to_string()),
        },
        name: name.to_string(),
        arguments: arguments.to_string(),
    }
}

/// Backend whose runs follow pre-recorded scripts.
#[derive(Default)]
pub struct ScriptedBackend {
    state: Mutex<FakeState>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the script for the next submitted run.
    pub fn push_run(&self, steps: Vec<Step>, reply: Option<&str>) {
        self.state.lock().unwrap().queued_runs.push_back(RunScript {
            steps: steps.into(),
            reply: reply.map(str::to_string),
        });
    }

    /// Store a message with an explicit timestamp.
    pub fn seed_message(
        &self,
        conversation_id: &ConversationId,
        role: MessageRole,
        text: &str,
        at: DateTime<Utc>,
    ) {
        let mut state = self.state.lock().unwrap();
        let id = state.next("msg");
        state
            .messages
            .entry(conversation_id.clone())
            .or_default()
            .push(Message::new(id, role, text, at));
    }

    pub fn calls(&self) -> CallCounts {
        self.state.lock().unwrap().calls
    }

    pub fn decisions(&self) -> Vec<Vec<ActionDecision>> {
        self.state.lock().unwrap().decisions.clone()
    }

    pub fn fail_next_decision_submits(&self, count: usize) {
        self.state.lock().unwrap().failing_decision_submits = count;
    }

    /// Answer every `get_run` with this HTTP status.
    pub fn fail_status_checks_with(&self, status: u16) {
        self.state.lock().unwrap().failing_status_code = Some(status);
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.state.lock().unwrap().fail_list = fail;
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.state.lock().unwrap().fail_create = fail;
    }

    /// Return messages in storage order, ignoring the requested order.
    pub fn set_raw_listing(&self, raw: bool) {
        self.state.lock().unwrap().raw_listing = raw;
    }

    pub fn max_active_runs(&self) -> usize {
        self.state.lock().unwrap().max_active_runs
    }

    fn unavailable() -> AgentError {
        AgentError::BackendUnavailable("scripted outage".to_string())
    }
}

impl AgentBackend for ScriptedBackend {
    fn create_conversation(&self) -> BackendFuture<'_, AgentResult<ConversationId>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.calls.create_conversation += 1;
            if state.fail_create {
                return Err(Self::unavailable());
            }
            Ok(ConversationId::new(state.next("thread")))
        })
    }

    fn append_message<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        role: MessageRole,
        text: &'a str,
    ) -> BackendFuture<'a, AgentResult<MessageId>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.calls.append_message += 1;
            state.push_message(conversation_id, role, text);
            let last = state
                .messages
                .get(conversation_id)
                .and_then(|messages| messages.last())
                .map(|message| message.id.clone());
            last.ok_or_else(|| AgentError::InvalidResponse("message not stored".to_string()))
        })
    }

    fn submit_run<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        _request: &'a RunRequest,
    ) -> BackendFuture<'a, AgentResult<RunHandle>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.calls.submit_run += 1;
            let script = state.queued_runs.pop_front().unwrap_or_else(|| RunScript {
                steps: VecDeque::from([Step::Status(RunStatus::Completed)]),
                reply: None,
            });
            let run_id = RunId::new(state.next("run"));
            state.active_runs += 1;
            state.max_active_runs = state.max_active_runs.max(state.active_runs);
            state.runs.insert(
                run_id.clone(),
                ActiveRun {
                    conversation_id: conversation_id.clone(),
                    script,
                    last: Step::Status(RunStatus::Queued),
                    finished: false,
                },
            );
            Ok(RunHandle::new(
                conversation_id.clone(),
                run_id,
                RunStatus::Queued,
            ))
        })
    }

    fn get_run<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        run_id: &'a RunId,
    ) -> BackendFuture<'a, AgentResult<RunHandle>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.calls.get_run += 1;
            if let Some(status) = state.failing_status_code {
                return Err(AgentError::Status {
                    status,
                    body: "scripted status failure".to_string(),
                });
            }
            let run = state
                .runs
                .get_mut(run_id)
                .ok_or_else(|| AgentError::Status {
                    status: 404,
                    body: format!("no run {run_id}"),
                })?;
            if let Some(step) = run.script.steps.pop_front() {
                run.last = step;
            }
            let step = run.last.clone();

            let mut handle = RunHandle::new(conversation_id.clone(), run_id.clone(), RunStatus::Queued);
            match step {
                Step::Status(status) => handle.status = status,
                Step::NeedsInput(actions) => {
                    handle.status = RunStatus::NeedsInput;
                    handle.pending_actions = actions;
                }
                Step::Fail(detail) => {
                    handle.status = RunStatus::Failed;
                    handle.last_error = Some(detail);
                }
            }

            if handle.status.is_terminal() && !run.finished {
                run.finished = true;
                let reply = run.script.reply.take();
                let owner = run.conversation_id.clone();
                state.active_runs = state.active_runs.saturating_sub(1);
                if handle.status == RunStatus::Completed
                    && let Some(reply) = reply
                {
                    state.push_message(&owner, MessageRole::Agent, &reply);
                }
            }
            Ok(handle)
        })
    }

    fn submit_action_decisions<'a>(
        &'a self,
        _conversation_id: &'a ConversationId,
        _run_id: &'a RunId,
        decisions: Vec<ActionDecision>,
    ) -> BackendFuture<'a, AgentResult<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.calls.submit_decisions += 1;
            if state.failing_decision_submits > 0 {
                state.failing_decision_submits -= 1;
                return Err(Self::unavailable());
            }
            state.decisions.push(decisions);
            Ok(())
        })
    }

    fn cancel_run<'a>(
        &'a self,
        _conversation_id: &'a ConversationId,
        run_id: &'a RunId,
    ) -> BackendFuture<'a, AgentResult<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.calls.cancel_run += 1;
            let mut finished_now = false;
            if let Some(run) = state.runs.get_mut(run_id) {
                run.last = Step::Status(RunStatus::Cancelled);
                run.script.steps.clear();
                if !run.finished {
                    run.finished = true;
                    finished_now = true;
                }
            }
            if finished_now {
                state.active_runs = state.active_runs.saturating_sub(1);
            }
            Ok(())
        })
    }

    fn list_messages<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        page: PageRequest,
    ) -> BackendFuture<'a, AgentResult<MessagePage>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.calls.list_messages += 1;
            if state.fail_list {
                return Err(Self::unavailable());
            }
            let mut all = state
                .messages
                .get(conversation_id)
                .cloned()
                .unwrap_or_default();
            if !state.raw_listing {
                all.sort_by_key(|message| message.created_at);
                if page.order == ListOrder::Descending {
                    all.reverse();
                }
            }

            let start = page
                .after
                .as_ref()
                .and_then(|after| all.iter().position(|message| &message.id == after))
                .map_or(0, |index| index + 1);
            let remaining = all.get(start..).unwrap_or_default();
            let messages: Vec<Message> = remaining.iter().take(page.limit).cloned().collect();
            let has_more = remaining.len() > messages.len();
            let last_id = messages.last().map(|message| message.id.clone());
            Ok(MessagePage {
                messages,
                has_more,
                last_id,
            })
        })
    }

    fn create_worker<'a>(&'a self, _spec: &'a WorkerSpec) -> BackendFuture<'a, AgentResult<WorkerId>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.calls.create_worker += 1;
            Ok(WorkerId::new(state.next("asst")))
        })
    }

    fn delete_worker<'a>(&'a self, _worker_id: &'a WorkerId) -> BackendFuture<'a, AgentResult<()>> {
        Box::pin(async move {
            self.state.lock().unwrap().calls.delete_worker += 1;
            Ok(())
        })
    }
}
