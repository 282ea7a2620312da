use app::app::run::{CreateRunParams, RunApp, RunAppImpl, ToolApprovalSubmission};
use app::app::RunContext;
use domain::event::{RunEventKind, RunStreamEvent};
use domain::id::{AssistantId, PrincipalId, RunId, ThreadId};
use domain::run::RunStatus;
use domain::step::RunStepStatus;
use domain::tool::{ApprovalRequirement, EngineToolResult, ToolUsage};
use infra::infra::event::RunEventSubscriber;
use infra::infra::module::RepositoryModule;
use runweaver_base::config::{QueueConfig, RunConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use worker_app::engine::scripted::{RejectionBehavior, ScriptAction, ScriptedEngine};
use worker_app::worker::dispatcher::RunJobDispatcherImpl;
use worker_app::worker::executor::RunExecutorImpl;

struct Harness {
    repositories: Arc<RepositoryModule>,
    run_app: RunAppImpl,
    executor: Arc<RunExecutorImpl>,
}

fn harness(run_config: RunConfig, script: Vec<ScriptAction>) -> Harness {
    let queue_config = Arc::new(QueueConfig::default());
    let run_config = Arc::new(run_config);
    let repositories = Arc::new(RepositoryModule::new_chan(&queue_config));
    let run_app = RunAppImpl::new(run_config.clone(), repositories.clone());
    let executor = Arc::new(RunExecutorImpl::new(
        run_config,
        queue_config,
        repositories.clone(),
        Arc::new(ScriptedEngine::new(script)),
    ));
    Harness {
        repositories,
        run_app,
        executor,
    }
}

fn code_interpreter_action() -> ScriptAction {
    ScriptAction::Tool {
        name: "code_interpreter".to_string(),
        input: serde_json::json!({"code": "print('hello')"}),
        missing_inputs: vec![],
        result: EngineToolResult::CodeInterpreter {
            stdout: "hello".to_string(),
            stderr: String::new(),
            output_file_ids: vec![domain::id::FileId::from("file_out1")],
        },
        on_rejection: RejectionBehavior::ContinueRun,
    }
}

fn hello_world_message() -> ScriptAction {
    ScriptAction::Message {
        deltas: vec!["Hello".to_string(), " world".to_string()],
        final_text: None,
    }
}

fn create_params(tools: Vec<ToolUsage>, approvals: HashMap<String, ApprovalRequirement>) -> CreateRunParams {
    CreateRunParams {
        thread_id: ThreadId::from("thread_e2e"),
        assistant_id: AssistantId::from("asst_e2e"),
        tools,
        tool_approvals: approvals,
        instructions: Some("be useful".to_string()),
        model: "meta-llama/llama-3-1-70b-instruct".to_string(),
        metadata: HashMap::new(),
    }
}

fn ctx() -> RunContext {
    RunContext::new(PrincipalId::from("user_e2e"))
}

/// Collect all published events for the run until the stream-end sentinel.
async fn collect_events(
    repositories: &RepositoryModule,
    run_id: &RunId,
) -> tokio::task::JoinHandle<Vec<RunStreamEvent>> {
    let subscription = repositories.event_subscriber.subscribe_run(run_id).await.unwrap();
    tokio::spawn(async move {
        use futures::StreamExt;
        subscription.into_event_stream().collect().await
    })
}

#[tokio::test]
async fn test_happy_path_tool_and_streamed_message() {
    let harness = harness(
        RunConfig::default(),
        vec![code_interpreter_action(), hello_world_message()],
    );
    let run = harness
        .run_app
        .create_run(&ctx(), create_params(vec![ToolUsage::CodeInterpreter], HashMap::new()))
        .await
        .unwrap();
    let events = collect_events(&harness.repositories, &run.id).await;

    harness
        .executor
        .execute(&run.id, CancellationToken::new())
        .await
        .unwrap();

    let stored = harness
        .repositories
        .run_repository
        .find(&run.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
    assert!(stored.completed_at.is_some());
    assert!(stored.cancelled_at.is_none() && stored.failed_at.is_none());

    let messages = harness
        .repositories
        .message_repository
        .find_by_run(&run.id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "Hello world");

    let steps = harness
        .repositories
        .step_repository
        .find_by_run(&run.id)
        .await
        .unwrap();
    assert_eq!(steps.len(), 2);
    assert!(steps.iter().all(|s| s.status == RunStepStatus::Completed));

    let events = events.await.unwrap();
    let kinds: Vec<RunEventKind> = events.iter().map(|e| e.event).collect();
    assert_eq!(
        kinds,
        vec![
            RunEventKind::RunInProgress,
            RunEventKind::StepCreated,
            RunEventKind::StepInProgress,
            RunEventKind::StepCompleted,
            RunEventKind::StepCreated,
            RunEventKind::StepInProgress,
            RunEventKind::MessageCreated,
            RunEventKind::MessageInProgress,
            RunEventKind::MessageDelta,
            RunEventKind::MessageDelta,
            RunEventKind::MessageCompleted,
            RunEventKind::StepCompleted,
            RunEventKind::RunCompleted,
            RunEventKind::Done,
        ]
    );
    // exactly one terminal run event, immediately before the sentinel
    assert_eq!(
        kinds
            .iter()
            .filter(|k| **k == RunEventKind::RunCompleted)
            .count(),
        1
    );
    let deltas: Vec<String> = events
        .iter()
        .filter(|e| e.event == RunEventKind::MessageDelta)
        .map(|e| {
            e.data["delta"]["content"][0]["text"]["value"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(deltas, vec!["Hello".to_string(), " world".to_string()]);
}

#[tokio::test]
async fn test_approval_always_gates_and_approve_resumes() {
    let mut approvals = HashMap::new();
    approvals.insert("code_interpreter".to_string(), ApprovalRequirement::Always);
    let harness = harness(
        RunConfig::default(),
        vec![code_interpreter_action(), hello_world_message()],
    );
    let run = harness
        .run_app
        .create_run(&ctx(), create_params(vec![ToolUsage::CodeInterpreter], approvals))
        .await
        .unwrap();
    let events = collect_events(&harness.repositories, &run.id).await;

    let executor = harness.executor.clone();
    let run_id = run.id.clone();
    let execution =
        tokio::spawn(async move { executor.execute(&run_id, CancellationToken::new()).await });

    // wait until the run suspends on the approval gate
    let gated = loop {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let current = harness
            .repositories
            .run_repository
            .find(&run.id)
            .await
            .unwrap()
            .unwrap();
        if current.status == RunStatus::RequiresAction {
            break current;
        }
        assert!(!current.is_terminal(), "run must not finish unapproved");
    };
    let action = gated.required_action.unwrap();
    assert_eq!(action.kind_name(), "submit_tool_approvals");
    assert_eq!(action.tool_calls().len(), 1);
    let pending_call = action.tool_calls()[0].clone();
    assert_eq!(pending_call.approval_key(), "code_interpreter");

    // the first stream segment ended with the done sentinel before resubmission
    let first_segment = events.await.unwrap();
    let kinds: Vec<RunEventKind> = first_segment.iter().map(|e| e.event).collect();
    assert_eq!(kinds.last(), Some(&RunEventKind::Done));
    assert!(kinds.contains(&RunEventKind::RunRequiresAction));
    assert!(!kinds.contains(&RunEventKind::RunCompleted));

    // re-attach (as a resuming client would) and approve
    let second_segment = collect_events(&harness.repositories, &run.id).await;
    harness
        .run_app
        .submit_tool_approvals(
            &run.id,
            vec![ToolApprovalSubmission {
                tool_call_id: pending_call.id.clone(),
                approve: true,
            }],
        )
        .await
        .unwrap();

    execution.await.unwrap().unwrap();
    let stored = harness
        .repositories
        .run_repository
        .find(&run.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, RunStatus::Completed);

    // the gated step went created -> in_progress -> completed across segments
    let kinds: Vec<RunEventKind> = second_segment
        .await
        .unwrap()
        .iter()
        .map(|e| e.event)
        .collect();
    let in_progress = kinds
        .iter()
        .position(|k| *k == RunEventKind::StepInProgress)
        .unwrap();
    let completed = kinds
        .iter()
        .position(|k| *k == RunEventKind::StepCompleted)
        .unwrap();
    assert!(in_progress < completed);
    let steps = harness
        .repositories
        .step_repository
        .find_by_run(&run.id)
        .await
        .unwrap();
    assert!(steps.iter().all(|s| s.status == RunStepStatus::Completed));
}

#[tokio::test]
async fn test_approval_denied_fails_tool_and_run() {
    let mut approvals = HashMap::new();
    approvals.insert("code_interpreter".to_string(), ApprovalRequirement::Always);
    let abort_on_denial = ScriptAction::Tool {
        name: "code_interpreter".to_string(),
        input: serde_json::json!({"code": "print('hello')"}),
        missing_inputs: vec![],
        result: EngineToolResult::CodeInterpreter {
            stdout: "hello".to_string(),
            stderr: String::new(),
            output_file_ids: vec![],
        },
        on_rejection: RejectionBehavior::AbortRun,
    };
    let harness = harness(
        RunConfig::default(),
        vec![abort_on_denial, hello_world_message()],
    );
    let run = harness
        .run_app
        .create_run(&ctx(), create_params(vec![ToolUsage::CodeInterpreter], approvals))
        .await
        .unwrap();

    let executor = harness.executor.clone();
    let run_id = run.id.clone();
    let execution =
        tokio::spawn(async move { executor.execute(&run_id, CancellationToken::new()).await });

    let pending_call = loop {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let current = harness
            .repositories
            .run_repository
            .find(&run.id)
            .await
            .unwrap()
            .unwrap();
        if current.status == RunStatus::RequiresAction {
            break current.required_action.unwrap().tool_calls()[0].clone();
        }
    };
    harness
        .run_app
        .submit_tool_approvals(
            &run.id,
            vec![ToolApprovalSubmission {
                tool_call_id: pending_call.id,
                approve: false,
            }],
        )
        .await
        .unwrap();

    // the executor itself succeeds; the run outcome carries the failure
    execution.await.unwrap().unwrap();
    let stored = harness
        .repositories
        .run_repository
        .find(&run.id)
        .await
        .unwrap()
        .unwrap();
    // never a silent success: the denial surfaces as a failed run (the
    // denied tool kind fails the whole run) with the step failure recorded
    assert_eq!(stored.status, RunStatus::Failed);
    let steps = harness
        .repositories
        .step_repository
        .find_by_run(&run.id)
        .await
        .unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status, RunStepStatus::Failed);
    assert!(steps[0].last_error.is_some());
}

#[tokio::test]
async fn test_expiration_wins_over_in_flight_success() {
    // the engine would succeed instantly, but the deadline already elapsed
    let harness = harness(
        RunConfig {
            expiration_milliseconds: 0,
            ..RunConfig::default()
        },
        vec![hello_world_message()],
    );
    let run = harness
        .run_app
        .create_run(&ctx(), create_params(vec![], HashMap::new()))
        .await
        .unwrap();
    harness
        .executor
        .execute(&run.id, CancellationToken::new())
        .await
        .unwrap();
    let stored = harness
        .repositories
        .run_repository
        .find(&run.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, RunStatus::Expired);
    assert!(stored.completed_at.is_none() && stored.failed_at.is_none());
}

#[tokio::test]
async fn test_expiration_interrupts_running_engine() {
    let harness = harness(
        RunConfig {
            expiration_milliseconds: 80,
            status_poll_interval_milliseconds: 20,
            ..RunConfig::default()
        },
        vec![ScriptAction::Sleep(Duration::from_secs(30)), hello_world_message()],
    );
    let run = harness
        .run_app
        .create_run(&ctx(), create_params(vec![], HashMap::new()))
        .await
        .unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        harness.executor.execute(&run.id, CancellationToken::new()),
    )
    .await
    .expect("expiration must interrupt the engine")
    .unwrap();
    let stored = harness
        .repositories
        .run_repository
        .find(&run.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, RunStatus::Expired);
}

#[tokio::test]
async fn test_cancel_while_suspended_on_gate() {
    let mut approvals = HashMap::new();
    approvals.insert("code_interpreter".to_string(), ApprovalRequirement::Always);
    let harness = harness(
        RunConfig {
            status_poll_interval_milliseconds: 20,
            ..RunConfig::default()
        },
        vec![code_interpreter_action(), hello_world_message()],
    );
    let run = harness
        .run_app
        .create_run(&ctx(), create_params(vec![ToolUsage::CodeInterpreter], approvals))
        .await
        .unwrap();
    let first_segment = collect_events(&harness.repositories, &run.id).await;

    let executor = harness.executor.clone();
    let run_id = run.id.clone();
    let execution =
        tokio::spawn(async move { executor.execute(&run_id, CancellationToken::new()).await });

    loop {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let status = harness
            .repositories
            .run_repository
            .find_status(&run.id)
            .await
            .unwrap()
            .unwrap();
        if status == RunStatus::RequiresAction {
            break;
        }
    }
    // drain the pre-suspension stream segment so the next subscription
    // starts strictly after the gate's done sentinel
    first_segment.await.unwrap();
    let events = collect_events(&harness.repositories, &run.id).await;
    harness.run_app.cancel_run(&run.id).await.unwrap();

    // cancellation must unblock the gate within the poll bound
    tokio::time::timeout(Duration::from_secs(5), execution)
        .await
        .expect("cancel must unblock the suspended gate")
        .unwrap()
        .unwrap();
    let stored = harness
        .repositories
        .run_repository
        .find(&run.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, RunStatus::Cancelled);
    assert!(stored.cancelled_at.is_some());

    let steps = harness
        .repositories
        .step_repository
        .find_by_run(&run.id)
        .await
        .unwrap();
    assert_eq!(steps[0].status, RunStepStatus::Cancelled);

    // second cancel is rejected, no double transition
    assert!(harness.run_app.cancel_run(&run.id).await.is_err());

    let kinds: Vec<RunEventKind> = events.await.unwrap().iter().map(|e| e.event).collect();
    assert_eq!(
        kinds
            .iter()
            .filter(|k| **k == RunEventKind::RunCancelled)
            .count(),
        1
    );
    assert_eq!(kinds.last(), Some(&RunEventKind::Done));
}

#[tokio::test]
async fn test_duplicate_approval_delivery_is_harmless() {
    let mut approvals = HashMap::new();
    approvals.insert("code_interpreter".to_string(), ApprovalRequirement::Always);
    let harness = harness(
        RunConfig::default(),
        vec![code_interpreter_action(), hello_world_message()],
    );
    let run = harness
        .run_app
        .create_run(&ctx(), create_params(vec![ToolUsage::CodeInterpreter], approvals))
        .await
        .unwrap();
    let first_segment = collect_events(&harness.repositories, &run.id).await;

    let executor = harness.executor.clone();
    let run_id = run.id.clone();
    let execution =
        tokio::spawn(async move { executor.execute(&run_id, CancellationToken::new()).await });

    let pending_call = loop {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let current = harness
            .repositories
            .run_repository
            .find(&run.id)
            .await
            .unwrap()
            .unwrap();
        if current.status == RunStatus::RequiresAction {
            break current.required_action.unwrap().tool_calls()[0].clone();
        }
    };
    first_segment.await.unwrap();
    let events = collect_events(&harness.repositories, &run.id).await;

    // deliver the approval twice; the second lands on a gone subscription
    use infra::infra::event::{gate_channel_name, GatePurpose};
    let channel = gate_channel_name(&run.id, &pending_call.id, GatePurpose::Approve);
    harness
        .repositories
        .event_publisher
        .publish_raw(&channel, b"true".to_vec(), true)
        .await
        .unwrap();
    harness
        .repositories
        .event_publisher
        .publish_raw(&channel, b"true".to_vec(), false)
        .await
        .unwrap();

    execution.await.unwrap().unwrap();
    let stored = harness
        .repositories
        .run_repository
        .find(&run.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, RunStatus::Completed);

    let kinds: Vec<RunEventKind> = events.await.unwrap().iter().map(|e| e.event).collect();
    assert_eq!(
        kinds
            .iter()
            .filter(|k| **k == RunEventKind::RunCompleted)
            .count(),
        1
    );
    assert_eq!(
        kinds
            .iter()
            .filter(|k| k.is_stream_end())
            .count(),
        1
    );
}

#[tokio::test]
async fn test_dispatcher_runs_enqueued_jobs() {
    let harness = harness(RunConfig::default(), vec![hello_world_message()]);
    let shutdown = CancellationToken::new();
    let dispatcher = Arc::new(RunJobDispatcherImpl::new(
        harness.repositories.job_queue.clone(),
        harness.executor.clone(),
        4,
        shutdown.clone(),
    ));
    let dispatcher2 = dispatcher.clone();
    let dispatching = tokio::spawn(async move { dispatcher2.dispatch_jobs().await });

    let run = harness
        .run_app
        .create_run(&ctx(), create_params(vec![], HashMap::new()))
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let status = harness
            .repositories
            .run_repository
            .find_status(&run.id)
            .await
            .unwrap()
            .unwrap();
        if status == RunStatus::Completed {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "dispatcher should have completed the run"
        );
    }

    shutdown.cancel();
    dispatching.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_engine_failure_marks_run_failed() {
    let harness = harness(
        RunConfig::default(),
        vec![ScriptAction::Fail {
            message: "model backend unavailable".to_string(),
        }],
    );
    let run = harness
        .run_app
        .create_run(&ctx(), create_params(vec![], HashMap::new()))
        .await
        .unwrap();
    let events = collect_events(&harness.repositories, &run.id).await;
    harness
        .executor
        .execute(&run.id, CancellationToken::new())
        .await
        .unwrap();
    let stored = harness
        .repositories
        .run_repository
        .find(&run.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    let last_error = stored.last_error.unwrap();
    assert!(last_error.message.contains("model backend unavailable"));

    let kinds: Vec<RunEventKind> = events.await.unwrap().iter().map(|e| e.event).collect();
    assert_eq!(
        kinds,
        vec![
            RunEventKind::RunInProgress,
            RunEventKind::RunFailed,
            RunEventKind::Done
        ]
    );
}
