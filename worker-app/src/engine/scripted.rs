use super::AgentEngine;
use anyhow::Result;
use async_trait::async_trait;
use domain::engine::{EngineEvent, EngineInput, GateVerdict};
use domain::tool::EngineToolResult;
use runweaver_base::error::OrchestratorError;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// What a scripted engine does after a tool verdict comes back as an error
/// (denied approval, cancelled gate).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectionBehavior {
    /// Surface the tool failure and unwind the whole run.
    AbortRun,
    /// Surface the tool failure and move on to the next action.
    ContinueRun,
}

#[derive(Debug)]
pub enum ScriptAction {
    Tool {
        name: String,
        input: Value,
        missing_inputs: Vec<String>,
        result: EngineToolResult,
        on_rejection: RejectionBehavior,
    },
    Message {
        deltas: Vec<String>,
        final_text: Option<String>,
    },
    Thought {
        deltas: Vec<String>,
    },
    Sleep(Duration),
    Fail {
        message: String,
    },
}

/// Deterministic engine replaying a fixed action script. Stands in for a
/// real reasoning loop in tests and the demo binary while honouring the
/// full engine contract (verdict waits, cancellation, failure surfacing).
pub struct ScriptedEngine {
    script: Vec<ScriptAction>,
}

impl ScriptedEngine {
    pub fn new(script: Vec<ScriptAction>) -> Self {
        Self { script }
    }

    async fn emit(events: &mpsc::Sender<EngineEvent>, event: EngineEvent) -> Result<()> {
        events
            .send(event)
            .await
            .map_err(|e| OrchestratorError::ChanError(anyhow::anyhow!("engine event send: {e}")).into())
    }

    async fn await_verdict(
        rx: oneshot::Receiver<Result<GateVerdict>>,
        cancel: &CancellationToken,
    ) -> Result<GateVerdict> {
        tokio::select! {
            verdict = rx => verdict
                .map_err(|_| OrchestratorError::ChanError(anyhow::anyhow!("verdict channel dropped")))?,
            _ = cancel.cancelled() => {
                Err(OrchestratorError::Cancelled("engine cancelled awaiting verdict".to_string()).into())
            }
        }
    }
}

#[async_trait]
impl AgentEngine for ScriptedEngine {
    async fn run(
        &self,
        input: EngineInput,
        events: mpsc::Sender<EngineEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        tracing::debug!("scripted engine started for run {}", input.run_id);
        for action in &self.script {
            if cancel.is_cancelled() {
                return Err(
                    OrchestratorError::Cancelled("engine observed cancellation".to_string()).into(),
                );
            }
            match action {
                ScriptAction::Tool {
                    name,
                    input: tool_input,
                    missing_inputs,
                    result,
                    on_rejection,
                } => {
                    let (tx, rx) = oneshot::channel();
                    Self::emit(
                        &events,
                        EngineEvent::ToolStarted {
                            name: name.clone(),
                            input: tool_input.clone(),
                            missing_inputs: missing_inputs.clone(),
                            meta: None,
                            verdict: tx,
                        },
                    )
                    .await?;
                    match Self::await_verdict(rx, &cancel).await {
                        Ok(GateVerdict::Proceed) | Ok(GateVerdict::ProceedWithInputs(_)) => {
                            Self::emit(
                                &events,
                                EngineEvent::ToolSucceeded {
                                    result: result.clone(),
                                },
                            )
                            .await?;
                        }
                        Ok(GateVerdict::ProvideOutput(output)) => {
                            Self::emit(
                                &events,
                                EngineEvent::ToolSucceeded {
                                    result: EngineToolResult::Text { value: output },
                                },
                            )
                            .await?;
                        }
                        Err(e) => {
                            let cancelled = runweaver_base::error::is_cancellation_error(&e);
                            let message = format!("{e}");
                            Self::emit(&events, EngineEvent::ToolFailed { error: e }).await?;
                            if cancelled {
                                return Err(OrchestratorError::Cancelled(message).into());
                            }
                            if *on_rejection == RejectionBehavior::AbortRun {
                                return Err(OrchestratorError::ToolRejected(message).into());
                            }
                        }
                    }
                }
                ScriptAction::Message { deltas, final_text } => {
                    for delta in deltas {
                        Self::emit(
                            &events,
                            EngineEvent::MessageDelta {
                                text: delta.clone(),
                                meta: None,
                            },
                        )
                        .await?;
                    }
                    Self::emit(
                        &events,
                        EngineEvent::MessageCompleted {
                            text: final_text.clone(),
                        },
                    )
                    .await?;
                }
                ScriptAction::Thought { deltas } => {
                    for delta in deltas {
                        Self::emit(
                            &events,
                            EngineEvent::ThoughtDelta {
                                text: delta.clone(),
                                meta: None,
                            },
                        )
                        .await?;
                    }
                }
                ScriptAction::Sleep(duration) => {
                    tokio::select! {
                        _ = tokio::time::sleep(*duration) => {}
                        _ = cancel.cancelled() => {
                            return Err(OrchestratorError::Cancelled(
                                "engine cancelled while idle".to_string(),
                            )
                            .into());
                        }
                    }
                }
                ScriptAction::Fail { message } => {
                    return Err(OrchestratorError::RuntimeError(message.clone()).into());
                }
            }
        }
        tracing::debug!("scripted engine finished for run {}", input.run_id);
        Ok(())
    }
}
