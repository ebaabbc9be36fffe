//! One user turn: generate → extract → screen → execute → record → explain.
//!
//! Turns are strictly sequential. The only suspension point is the model
//! stream; the executor blocks for at most its timeout.

use crate::executor::CommandExecutor;
use crate::explainer;
use crate::extractor::extract_command;
use crate::model_client::{consume, ChatBackend, GenerationProfile, ModelClient, ModelError};
use crate::safety::{self, SafetyVerdict};
use crate::storage::ExecutionResult;
use crate::store_manager::Recorder;
use std::ops::ControlFlow;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Generating,
    Extracted,
    Rejected,
    Accepted,
    Executed,
    Recorded,
    Explaining,
}

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(#[source] ModelError),

    #[error("model returned no usable command")]
    EmptyGeneration,

    #[error("blocked unsafe command `{command}` (matched `{pattern}`)")]
    UnsafeCommand {
        command: String,
        pattern: &'static str,
    },

    #[error("interrupted")]
    Interrupted,
}

/// A turn that reached execution. Timeouts and spawn failures still land here.
#[derive(Debug, Clone)]
pub struct Turn {
    pub request: String,
    pub command: String,
    pub result: ExecutionResult,
    /// Set when the recorder refused the interaction; the turn itself stands.
    pub record_error: Option<String>,
    pub state: TurnState,
}

pub struct Pipeline<'s, B, R> {
    client: ModelClient<B>,
    executor: CommandExecutor,
    recorder: &'s R,
    command_profile: GenerationProfile,
    explain_profile: GenerationProfile,
}

impl<'s, B: ChatBackend, R: Recorder> Pipeline<'s, B, R> {
    pub fn new(
        client: ModelClient<B>,
        executor: CommandExecutor,
        recorder: &'s R,
        command_profile: GenerationProfile,
        explain_profile: GenerationProfile,
    ) -> Self {
        Self {
            client,
            executor,
            recorder,
            command_profile,
            explain_profile,
        }
    }

    /// Streams the command generation, handing each fragment to `on_fragment`,
    /// and returns the extracted candidate.
    pub fn generate_command<F>(&self, request: &str, on_fragment: F) -> Result<String, TurnError>
    where
        F: FnMut(&str) -> ControlFlow<()>,
    {
        transition(TurnState::Idle, TurnState::Generating);
        let stream = self
            .client
            .generate(&self.command_profile, request)
            .map_err(TurnError::ModelUnavailable)?;
        let full_text = consume(stream, on_fragment)
            .map_err(TurnError::ModelUnavailable)?
            .ok_or(TurnError::Interrupted)?;

        let command = extract_command(&full_text).ok_or(TurnError::EmptyGeneration)?;
        transition(TurnState::Generating, TurnState::Extracted);
        debug!(raw = %full_text, command = %command, "extracted candidate");
        Ok(command)
    }

    /// Runs a full turn up to and including recording.
    pub fn run_turn<F>(&self, request: &str, on_fragment: F) -> Result<Turn, TurnError>
    where
        F: FnMut(&str) -> ControlFlow<()>,
    {
        let command = self.generate_command(request, on_fragment)?;

        if let SafetyVerdict::Rejected { pattern } = safety::check(&command) {
            transition(TurnState::Extracted, TurnState::Rejected);
            warn!(command = %command, pattern, "blocked unsafe command");
            return Err(TurnError::UnsafeCommand { command, pattern });
        }
        transition(TurnState::Extracted, TurnState::Accepted);

        let result = self.executor.run(&command);
        transition(TurnState::Accepted, TurnState::Executed);
        debug!(
            exit_code = ?result.exit_code,
            timed_out = result.timed_out,
            failed = result.failed,
            duration_ms = result.duration_ms,
            "command finished"
        );

        let (state, record_error) =
            match self.recorder.save_conversation(request, &command, &result.output) {
                Ok(()) => {
                    transition(TurnState::Executed, TurnState::Recorded);
                    (TurnState::Recorded, None)
                }
                Err(e) => {
                    warn!(error = %e, "failed to record interaction");
                    (TurnState::Executed, Some(e.to_string()))
                }
            };

        Ok(Turn {
            request: request.to_string(),
            command,
            result,
            record_error,
            state,
        })
    }

    /// Streams an explanation of a finished turn. Returns the full text.
    pub fn explain<F>(&self, turn: &Turn, on_fragment: F) -> Result<String, TurnError>
    where
        F: FnMut(&str) -> ControlFlow<()>,
    {
        transition(turn.state, TurnState::Explaining);
        let stream = explainer::explain(
            &self.client,
            &self.explain_profile,
            &turn.request,
            &turn.command,
            &turn.result.output,
        )
        .map_err(TurnError::ModelUnavailable)?;
        let text = consume(stream, on_fragment)
            .map_err(TurnError::ModelUnavailable)?
            .ok_or(TurnError::Interrupted)?;
        transition(TurnState::Explaining, TurnState::Idle);
        Ok(text)
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }
}

fn transition(from: TurnState, to: TurnState) {
    debug!(?from, ?to, "turn state");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_client::{ChatRequest, FragmentStream};
    use crate::storage::{Conversation, Preference};
    use crate::store_manager::{StoreError, StoreManager};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tempfile::TempDir;

    enum Reply {
        Fragments(Vec<&'static str>),
        FailMidStream(Vec<&'static str>),
        Unreachable,
    }

    #[derive(Default)]
    struct ScriptedBackend {
        replies: RefCell<VecDeque<Reply>>,
        requests: RefCell<Vec<ChatRequest>>,
    }

    impl ScriptedBackend {
        fn with(replies: Vec<Reply>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                requests: RefCell::new(Vec::new()),
            }
        }
    }

    impl ChatBackend for ScriptedBackend {
        fn chat_stream(&self, request: &ChatRequest) -> Result<FragmentStream<'_>, ModelError> {
            self.requests.borrow_mut().push(request.clone());
            let reply = self.replies.borrow_mut().pop_front().expect("unexpected model call");
            match reply {
                Reply::Fragments(parts) => {
                    Ok(Box::new(parts.into_iter().map(|p| Ok(p.to_string()))))
                }
                Reply::FailMidStream(parts) => Ok(Box::new(
                    parts
                        .into_iter()
                        .map(|p| Ok(p.to_string()))
                        .chain(std::iter::once(Err(ModelError::Truncated))),
                )),
                Reply::Unreachable => Err(ModelError::Backend("connection refused".into())),
            }
        }
    }

    struct BrokenRecorder;

    impl Recorder for BrokenRecorder {
        fn save_conversation(&self, _: &str, _: &str, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }
        fn recent_conversations(&self, _: usize) -> Result<Vec<Conversation>, StoreError> {
            Ok(Vec::new())
        }
        fn set_pref(&self, _: &str, _: &str) -> Result<(), StoreError> {
            Ok(())
        }
        fn get_pref(&self, _: &str, default: &str) -> Result<String, StoreError> {
            Ok(default.to_string())
        }
        fn all_prefs(&self) -> Result<Vec<Preference>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn profile(model: &str, prompt: &str, max_tokens: u32) -> GenerationProfile {
        GenerationProfile {
            model: model.into(),
            system_prompt: prompt.into(),
            max_tokens,
        }
    }

    fn pipeline<'s, R: Recorder>(
        replies: Vec<Reply>,
        recorder: &'s R,
        timeout: Duration,
    ) -> Pipeline<'s, ScriptedBackend, R> {
        Pipeline::new(
            ModelClient::new(ScriptedBackend::with(replies)),
            CommandExecutor::new("sh", timeout),
            recorder,
            profile("cmd-model", explainer::COMMAND_SYSTEM_PROMPT, 32),
            profile("explain-model", explainer::EXPLAIN_SYSTEM_PROMPT, 128),
        )
    }

    fn keep_going(_: &str) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    #[test]
    fn accepted_command_runs_and_is_recorded() {
        let store = StoreManager::open_in_memory().unwrap();
        let p = pipeline(
            vec![Reply::Fragments(vec!["`ec", "ho ", "hel", "lo`"])],
            &store,
            Duration::from_secs(5),
        );

        let mut rendered = String::new();
        let turn = p
            .run_turn("say hello", |f| {
                rendered.push_str(f);
                ControlFlow::Continue(())
            })
            .unwrap();

        assert_eq!(rendered, "`echo hello`");
        assert_eq!(turn.command, "echo hello");
        assert_eq!(turn.result.output, "hello\n");
        assert_eq!(turn.state, TurnState::Recorded);

        let saved = store.recent_conversations(5).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].prompt, "say hello");
        assert_eq!(saved[0].command, "echo hello");
        assert_eq!(saved[0].output, "hello\n");
    }

    #[test]
    fn command_request_uses_command_profile() {
        let store = StoreManager::open_in_memory().unwrap();
        let p = pipeline(vec![Reply::Fragments(vec!["true"])], &store, Duration::from_secs(5));
        p.run_turn("do nothing", keep_going).unwrap();

        let requests = p.client.backend().requests.borrow();
        assert_eq!(requests[0].model, "cmd-model");
        assert_eq!(requests[0].options.num_predict, 32);
        assert_eq!(requests[0].messages[1].content, "do nothing");
        assert!(requests[0].stream);
    }

    #[test]
    fn streamed_fragments_reassemble_in_order() {
        let store = StoreManager::open_in_memory().unwrap();
        let p = pipeline(vec![Reply::Fragments(vec!["du", " -", "sh ", "/"])], &store, Duration::from_secs(5));
        assert_eq!(p.generate_command("disk usage", keep_going).unwrap(), "du -sh /");
    }

    #[test]
    fn unsafe_command_is_neither_run_nor_recorded() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let script: &'static str =
            Box::leak(format!("touch {} && rm -rf /tmp/nothing", marker.display()).into_boxed_str());

        let store = StoreManager::open_in_memory().unwrap();
        let p = pipeline(vec![Reply::Fragments(vec![script])], &store, Duration::from_secs(5));

        let err = p.run_turn("clean up", keep_going).unwrap_err();
        assert!(matches!(err, TurnError::UnsafeCommand { pattern: "rm ", .. }));
        assert!(!marker.exists());
        assert!(store.recent_conversations(5).unwrap().is_empty());
    }

    #[test]
    fn rm_rf_root_is_rejected() {
        let store = StoreManager::open_in_memory().unwrap();
        let p = pipeline(vec![Reply::Fragments(vec!["rm -rf /"])], &store, Duration::from_secs(5));
        let err = p.run_turn("free space", keep_going).unwrap_err();
        match err {
            TurnError::UnsafeCommand { command, .. } => assert_eq!(command, "rm -rf /"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(store.recent_conversations(5).unwrap().is_empty());
    }

    #[test]
    fn unreachable_model_aborts_turn() {
        let store = StoreManager::open_in_memory().unwrap();
        let p = pipeline(vec![Reply::Unreachable], &store, Duration::from_secs(5));
        let err = p.run_turn("list files", keep_going).unwrap_err();
        assert!(matches!(err, TurnError::ModelUnavailable(_)));
        assert!(store.recent_conversations(5).unwrap().is_empty());
    }

    #[test]
    fn mid_stream_failure_aborts_without_executing() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let partial: &'static str = Box::leak(format!("touch {}", marker.display()).into_boxed_str());

        let store = StoreManager::open_in_memory().unwrap();
        let p = pipeline(vec![Reply::FailMidStream(vec![partial])], &store, Duration::from_secs(5));
        let err = p.run_turn("make a file", keep_going).unwrap_err();
        assert!(matches!(err, TurnError::ModelUnavailable(ModelError::Truncated)));
        assert!(!marker.exists());
    }

    #[test]
    fn empty_generation_aborts_turn() {
        let store = StoreManager::open_in_memory().unwrap();
        let p = pipeline(vec![Reply::Fragments(vec!["```", "\n", "```"])], &store, Duration::from_secs(5));
        let err = p.run_turn("???", keep_going).unwrap_err();
        assert!(matches!(err, TurnError::EmptyGeneration));
        assert!(store.recent_conversations(5).unwrap().is_empty());
    }

    #[test]
    fn interrupt_during_stream_aborts_turn() {
        let store = StoreManager::open_in_memory().unwrap();
        let p = pipeline(vec![Reply::Fragments(vec!["ls", " -la"])], &store, Duration::from_secs(5));
        let err = p.run_turn("list", |_| ControlFlow::Break(())).unwrap_err();
        assert!(matches!(err, TurnError::Interrupted));
        assert!(store.recent_conversations(5).unwrap().is_empty());
    }

    #[test]
    fn timeout_is_recorded_like_success() {
        let store = StoreManager::open_in_memory().unwrap();
        let p = pipeline(vec![Reply::Fragments(vec!["sleep 5"])], &store, Duration::from_millis(300));
        let turn = p.run_turn("wait a bit", keep_going).unwrap();
        assert!(turn.result.timed_out);
        assert_eq!(turn.state, TurnState::Recorded);
        assert_eq!(store.recent_conversations(1).unwrap()[0].output, turn.result.output);
    }

    #[test]
    fn recorder_failure_does_not_abort_turn() {
        let recorder = BrokenRecorder;
        let p = pipeline(vec![Reply::Fragments(vec!["echo ok"])], &recorder, Duration::from_secs(5));
        let turn = p.run_turn("say ok", keep_going).unwrap();
        assert_eq!(turn.result.output, "ok\n");
        assert_eq!(turn.state, TurnState::Executed);
        assert!(turn.record_error.unwrap().contains("disk full"));
    }

    #[test]
    fn explanation_uses_second_profile_and_composed_prompt() {
        let store = StoreManager::open_in_memory().unwrap();
        let p = pipeline(
            vec![
                Reply::Fragments(vec!["echo hi"]),
                Reply::Fragments(vec!["It ", "printed ", "hi."]),
            ],
            &store,
            Duration::from_secs(5),
        );
        let turn = p.run_turn("greet", keep_going).unwrap();

        let mut shown = Vec::new();
        let text = p
            .explain(&turn, |f| {
                shown.push(f.to_string());
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(text, "It printed hi.");
        assert_eq!(shown.len(), 3);

        let requests = p.client.backend().requests.borrow();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].model, "explain-model");
        assert_eq!(requests[1].options.num_predict, 128);
        assert_eq!(requests[1].messages[0].content, explainer::EXPLAIN_SYSTEM_PROMPT);
        assert_eq!(requests[1].messages[1].content, "Request: greet\nCommand: echo hi\nOutput:\nhi\n");
    }
}
