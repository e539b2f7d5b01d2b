//! The conversation orchestrator: one user turn, start to finish.
//!
//! A turn is an explicit state machine:
//!
//! 1. **Init**: reset the session, seed the system and user messages
//! 2. **Requesting**: stream a model response; text goes straight to the
//!    surface while tool calls are dispatched as they arrive
//! 3. **Dispatching**: record the calls and their results in the transcript,
//!    then request again
//! 4. **Done**: the model answered without calling a tool
//!
//! The loop is capped at `max_iterations` model requests.

use std::collections::HashSet;
use std::sync::Arc;

use keilpilot_core::error::AgentError;
use keilpilot_core::message::{Message, MessagePart, Role};
use keilpilot_core::provider::{ModelEndpoint, ModelRequest, ResponsePart};
use keilpilot_core::surface::{ActionButton, OutputSurface};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::ToolCatalog;
use crate::dispatcher::{DispatchedCall, PendingCall, ToolDispatcher};
use crate::session::Session;

pub const DEFAULT_MAX_ITERATIONS: u32 = 25;

const MODEL_UNAVAILABLE_MESSAGE: &str =
    "Unable to access Language Model. Please check the model endpoint configuration and API key.";

/// What happened during a completed turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnReport {
    /// Model requests made
    pub iterations: u32,
    /// Tool calls executed across all iterations
    pub tool_calls: usize,
}

pub struct ConversationOrchestrator {
    model: Arc<dyn ModelEndpoint>,
    catalog: ToolCatalog,
    dispatcher: ToolDispatcher,
    system_prompt: String,
    max_iterations: u32,
}

impl ConversationOrchestrator {
    pub fn new(model: Arc<dyn ModelEndpoint>, catalog: ToolCatalog, system_prompt: impl Into<String>) -> Self {
        let dispatcher = ToolDispatcher::new(catalog.registry().clone());
        Self {
            model,
            catalog,
            dispatcher,
            system_prompt: system_prompt.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Set the maximum number of model requests per turn.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Run one user turn.
    ///
    /// Errors are also written to `surface` before being returned, so a host
    /// that only renders the surface still shows them.
    pub async fn handle_turn(
        &self,
        session: &mut Session,
        prompt: &str,
        tool_refs: Vec<String>,
        surface: &dyn OutputSurface,
        cancel: &CancellationToken,
    ) -> Result<TurnReport, AgentError> {
        session.reset(tool_refs);
        session.push(Message::system(&self.system_prompt));
        session.push(Message::user(prompt));

        info!(
            session_id = %session.id(),
            model = %self.model.name(),
            "Processing turn"
        );

        match self.run(session, surface, cancel).await {
            Ok(report) => {
                info!(
                    session_id = %session.id(),
                    iterations = report.iterations,
                    tool_calls = report.tool_calls,
                    "Turn complete"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(session_id = %session.id(), error = %e, "Turn aborted");
                match &e {
                    AgentError::ModelUnavailable(_) => surface.emit_text(MODEL_UNAVAILABLE_MESSAGE),
                    _ => surface.emit_text(&format!("\n\n⚠️ Error: {e}")),
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        session: &mut Session,
        surface: &dyn OutputSurface,
        cancel: &CancellationToken,
    ) -> Result<TurnReport, AgentError> {
        let mut report = TurnReport::default();
        let mut actions: Vec<ActionButton> = Vec::new();

        while report.iterations < self.max_iterations {
            report.iterations += 1;

            let selection = self.catalog.select(session.pending_tool_refs_mut());
            debug!(
                session_id = %session.id(),
                iteration = report.iterations,
                tools = ?selection.names(),
                mode = ?selection.mode,
                "Requesting model response"
            );

            let request = ModelRequest {
                messages: session.messages().to_vec(),
                tools: selection.definitions(),
                tool_mode: selection.mode,
            };

            let pending = self.request(request, surface, cancel).await?;
            if pending.is_empty() {
                if !actions.is_empty() {
                    surface.emit_action_buttons(&actions);
                }
                return Ok(report);
            }

            // Dropping the join aborts every call still running
            let finished = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                finished = self.dispatcher.join(pending) => finished,
            };
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            report.tool_calls += finished.len();
            actions.extend(finished.iter().flat_map(|f| f.output.actions.iter().cloned()));
            record_results(session, finished);
        }

        Err(AgentError::TooManyToolIterations(self.max_iterations))
    }

    /// Stream one response. Returns the tool calls it started.
    async fn request(
        &self,
        request: ModelRequest,
        surface: &dyn OutputSurface,
        cancel: &CancellationToken,
    ) -> Result<Vec<PendingCall>, AgentError> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            started = self.model.send(request, cancel.clone()) => {
                started.map_err(AgentError::ModelUnavailable)?
            }
        };

        let mut pending = Vec::new();
        let mut call_ids = HashSet::new();
        loop {
            let part = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                part = stream.recv() => part,
            };

            match part {
                None => break,
                Some(Ok(ResponsePart::Text { text })) => surface.emit_text(&text),
                Some(Ok(ResponsePart::ToolCall(mut call))) => {
                    if call.call_id.is_empty() || call_ids.contains(&call.call_id) {
                        let renamed = unique_call_id(&call.call_id, &call_ids);
                        warn!(
                            tool = %call.tool_name,
                            call_id = %call.call_id,
                            renamed = %renamed,
                            "Model reused or omitted a call id"
                        );
                        call.call_id = renamed;
                    }
                    call_ids.insert(call.call_id.clone());
                    debug!(tool = %call.tool_name, call_id = %call.call_id, "Model requested tool");
                    pending.push(self.dispatcher.dispatch(call, cancel.clone()));
                }
                Some(Err(e)) => return Err(AgentError::Stream(e)),
            }
        }
        Ok(pending)
    }
}

/// A call id not yet used in this response, derived from `base`.
fn unique_call_id(base: &str, taken: &HashSet<String>) -> String {
    let base = if base.is_empty() { "call" } else { base };
    (1..)
        .map(|n| format!("{base}_{n}"))
        .find(|id| !taken.contains(id))
        .unwrap_or_else(|| base.to_string())
}

/// Append a finished batch to the transcript.
///
/// One assistant message holds every call. Each call then gets a user
/// message whose single tool result carries the first content item; any
/// further items follow in a separate plain-text user message. A closing
/// message names the tools that ran.
fn record_results(session: &mut Session, finished: Vec<DispatchedCall>) {
    let names: Vec<String> = finished.iter().map(|f| f.call.tool_name.clone()).collect();
    session.push(Message::tool_calls(
        finished.iter().map(|f| f.call.clone()).collect(),
    ));

    for DispatchedCall { call, output } in finished {
        let mut items = output.content.into_iter();
        let primary: Vec<String> = items.next().into_iter().collect();
        session.push(Message::tool_result(call.call_id, primary));

        let rest: Vec<MessagePart> = items.map(MessagePart::text).collect();
        if !rest.is_empty() {
            session.push(Message::new(Role::User, rest));
        }
    }

    session.push(Message::user(format!(
        "Above is the result of calling the functions {}.",
        names.join(", ")
    )));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use keilpilot_core::error::ProviderError;
    use keilpilot_core::provider::ToolMode;
    use keilpilot_core::surface::{RecordingSurface, SurfaceWrite};
    use keilpilot_core::tool::ToolRegistry;
    use std::time::Duration;

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SleepTool));
        registry.register(Arc::new(ReportTool));
        registry.register(Arc::new(NamedTool::new("keilpilot_info")));
        registry.register(Arc::new(NamedTool::new("other_tool")));
        Arc::new(registry)
    }

    fn orchestrator(model: Arc<ScriptedModel>) -> ConversationOrchestrator {
        ConversationOrchestrator::new(
            model,
            ToolCatalog::new(registry(), "keilpilot"),
            "You are a helpful assistant for Keil uVision projects.",
        )
    }

    #[tokio::test]
    async fn text_only_response_ends_after_one_request() {
        let model = Arc::new(ScriptedModel::new(vec![Reply::Parts(vec![
            text("Hello! "),
            text("How can I help?"),
        ])]));
        let surface = RecordingSurface::new();
        let mut session = Session::new();

        let report = orchestrator(model.clone())
            .handle_turn(&mut session, "Hi", vec![], &surface, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report, TurnReport { iterations: 1, tool_calls: 0 });
        assert_eq!(model.call_count(), 1);
        assert_eq!(surface.text(), "Hello! How can I help?");
        // System + User
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[0].role, Role::System);
        assert_eq!(session.first_user_text(), Some("Hi"));

        let request = &model.requests()[0];
        assert_eq!(request.tool_mode, ToolMode::Auto);
        let offered: Vec<_> = request.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(offered, vec!["keilpilot_sleep", "keilpilot_report", "keilpilot_info"]);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_results_are_appended_in_call_order() {
        let model = Arc::new(ScriptedModel::new(vec![
            Reply::Parts(vec![
                text("Working on it. "),
                tool_call("a", "keilpilot_sleep", serde_json::json!({"ms": 200, "label": "A"})),
                tool_call("b", "keilpilot_sleep", serde_json::json!({"ms": 5, "label": "B"})),
                tool_call("c", "keilpilot_sleep", serde_json::json!({"ms": 50, "label": "C"})),
            ]),
            Reply::Parts(vec![text("All done.")]),
        ]));
        let surface = RecordingSurface::new();
        let mut session = Session::new();

        let report = orchestrator(model.clone())
            .handle_turn(&mut session, "Run them", vec![], &surface, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report, TurnReport { iterations: 2, tool_calls: 3 });

        let messages = session.messages();
        // System, User, Assistant(calls), 3 results, summary
        assert_eq!(messages.len(), 7);
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[2].parts.len(), 3);

        let results: Vec<_> = messages[3..6]
            .iter()
            .map(|m| m.parts[0].clone())
            .collect();
        assert_eq!(
            results,
            vec![
                MessagePart::tool_result("a", vec!["A".into()]),
                MessagePart::tool_result("b", vec!["B".into()]),
                MessagePart::tool_result("c", vec!["C".into()]),
            ]
        );
        assert_eq!(
            messages[6].text(),
            "Above is the result of calling the functions keilpilot_sleep, keilpilot_sleep, keilpilot_sleep."
        );

        // The second request saw the full transcript
        assert_eq!(model.requests()[1].messages.len(), 7);
        assert_eq!(surface.text(), "Working on it. All done.");
    }

    #[tokio::test]
    async fn explicit_references_are_consumed_one_per_iteration() {
        let model = Arc::new(ScriptedModel::new(vec![
            Reply::Parts(vec![tool_call("1", "keilpilot_info", serde_json::json!({}))]),
            Reply::Parts(vec![tool_call("2", "other_tool", serde_json::json!({}))]),
            Reply::Parts(vec![text("Done")]),
        ]));
        let mut session = Session::new();

        orchestrator(model.clone())
            .handle_turn(
                &mut session,
                "Use these",
                vec!["keilpilot_info".into(), "other_tool".into()],
                &RecordingSurface::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let requests = model.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].tool_mode, ToolMode::Required);
        assert_eq!(requests[0].tools.len(), 1);
        assert_eq!(requests[0].tools[0].name, "keilpilot_info");
        assert_eq!(requests[1].tool_mode, ToolMode::Required);
        assert_eq!(requests[1].tools[0].name, "other_tool");
        assert_eq!(requests[2].tool_mode, ToolMode::Auto);
        assert_eq!(requests[2].tools.len(), 3);
    }

    #[tokio::test]
    async fn extra_content_items_follow_as_plain_text() {
        let model = Arc::new(ScriptedModel::new(vec![
            Reply::Parts(vec![tool_call("r", "keilpilot_report", serde_json::json!({}))]),
            Reply::Parts(vec![text("Reported.")]),
        ]));
        let surface = RecordingSurface::new();
        let mut session = Session::new();

        orchestrator(model)
            .handle_turn(&mut session, "Report", vec![], &surface, &CancellationToken::new())
            .await
            .unwrap();

        let messages = session.messages();
        assert_eq!(
            messages[3].parts,
            vec![MessagePart::tool_result("r", vec!["summary".into()])]
        );
        assert_eq!(messages[4].role, Role::User);
        assert_eq!(
            messages[4].parts,
            vec![MessagePart::text("detail 1"), MessagePart::text("detail 2")]
        );
        assert_eq!(
            session.last_tool_result(),
            &[MessagePart::tool_result("r", vec!["summary".into()])]
        );

        // Buttons are surfaced once the turn is done
        let writes = surface.writes();
        assert!(matches!(
            writes.last(),
            Some(SurfaceWrite::Buttons(b)) if b[0].label == "Open build log"
        ));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_and_loop_continues() {
        let model = Arc::new(ScriptedModel::new(vec![
            Reply::Parts(vec![tool_call("x", "keilpilot_flash", serde_json::json!({}))]),
            Reply::Parts(vec![text("That tool does not exist.")]),
        ]));
        let mut session = Session::new();

        let report = orchestrator(model)
            .handle_turn(&mut session, "Flash it", vec![], &RecordingSurface::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.iterations, 2);
        assert_eq!(
            session.messages()[3].parts,
            vec![MessagePart::tool_result("x", vec!["Tool not found: keilpilot_flash".into()])]
        );
    }

    #[tokio::test]
    async fn model_unavailable_aborts_the_turn() {
        let model = Arc::new(ScriptedModel::new(vec![Reply::Fail(ProviderError::NotConfigured(
            "no API key configured".into(),
        ))]));
        let surface = RecordingSurface::new();
        let mut session = Session::new();

        let err = orchestrator(model.clone())
            .handle_turn(&mut session, "Build", vec![], &surface, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::ModelUnavailable(_)));
        assert!(surface.text().starts_with("Unable to access Language Model"));
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn stream_failure_is_surfaced_verbatim() {
        let model = Arc::new(ScriptedModel::new(vec![Reply::Broken(
            vec![text("Partial")],
            ProviderError::StreamInterrupted("connection reset".into()),
        )]));
        let surface = RecordingSurface::new();

        let err = orchestrator(model)
            .handle_turn(&mut Session::new(), "Build", vec![], &surface, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Stream(_)));
        assert!(surface.text().starts_with("Partial\n\n⚠️ Error: "));
        assert!(surface.text().contains("connection reset"));
    }

    #[tokio::test]
    async fn iteration_cap_stops_a_model_that_never_stops_calling_tools() {
        let replies = (0..3)
            .map(|i| Reply::Parts(vec![tool_call(&format!("c{i}"), "keilpilot_info", serde_json::json!({}))]))
            .collect();
        let model = Arc::new(ScriptedModel::new(replies));

        let err = orchestrator(model.clone())
            .with_max_iterations(3)
            .handle_turn(&mut Session::new(), "Loop", vec![], &RecordingSurface::new(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::TooManyToolIterations(3)));
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_a_hanging_stream() {
        let model = Arc::new(ScriptedModel::new(vec![Reply::Hang]));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let err = orchestrator(model)
            .handle_turn(&mut Session::new(), "Build", vec![], &RecordingSurface::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_does_not_wait_for_tools_that_ignore_it() {
        let model = Arc::new(ScriptedModel::new(vec![Reply::Parts(vec![tool_call(
            "a",
            "slow_flash",
            serde_json::json!({}),
        )])]));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StubbornTool::new("slow_flash", Duration::from_secs(60))));
        let orchestrator = ConversationOrchestrator::new(
            model,
            ToolCatalog::new(Arc::new(registry), "keilpilot"),
            "system",
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = orchestrator
            .handle_turn(&mut Session::new(), "Flash it", vec![], &RecordingSurface::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn duplicate_and_empty_call_ids_are_made_unique() {
        let model = Arc::new(ScriptedModel::new(vec![
            Reply::Parts(vec![
                tool_call("x", "keilpilot_info", serde_json::json!({})),
                tool_call("x", "keilpilot_info", serde_json::json!({})),
                tool_call("", "keilpilot_info", serde_json::json!({})),
            ]),
            Reply::Parts(vec![text("ok")]),
        ]));
        let mut session = Session::new();

        orchestrator(model)
            .handle_turn(&mut session, "Go", vec![], &RecordingSurface::new(), &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<String> = session.messages()[3..6]
            .iter()
            .map(|m| match &m.parts[0] {
                MessagePart::ToolResult { call_id, .. } => call_id.clone(),
                other => panic!("expected a tool result, got {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec!["x", "x_1", "call_1"]);

        let calls: Vec<String> = session.messages()[2]
            .parts
            .iter()
            .map(|p| match p {
                MessagePart::ToolCall(call) => call.call_id.clone(),
                other => panic!("expected a tool call, got {other:?}"),
            })
            .collect();
        assert_eq!(calls, ids);
    }

    #[tokio::test]
    async fn replaying_a_turn_yields_the_same_transcript_shape() {
        let script = || {
            vec![
                Reply::Parts(vec![
                    tool_call("1", "keilpilot_report", serde_json::json!({})),
                    tool_call("2", "keilpilot_info", serde_json::json!({})),
                ]),
                Reply::Parts(vec![text("ok")]),
            ]
        };
        let mut session = Session::new();

        orchestrator(Arc::new(ScriptedModel::new(script())))
            .handle_turn(&mut session, "Go", vec![], &RecordingSurface::new(), &CancellationToken::new())
            .await
            .unwrap();
        let first = session.shape();

        orchestrator(Arc::new(ScriptedModel::new(script())))
            .handle_turn(&mut session, "Go", vec![], &RecordingSurface::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.shape(), first);
        assert_eq!(first.len(), 7);
    }
}
