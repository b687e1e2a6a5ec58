// Chat session and request dispatch.
// The session is an explicit object owned by the caller (the REPL below, or the
// web server's shared state) and handed to the Dispatcher by reference.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::config::{GenerationSettings, SettingsUpdate};
use crate::error::{ChatError, UpstreamError};
use crate::events::SessionEvent;
use crate::gemini::{GenerationRequest, TextGenerator};
use crate::render::{self, TurnView, TypingFrames, ASSISTANT_NAME};
use crate::transcript::{Role, Transcript};

/// Where the latest user turn stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    #[default]
    Idle,
    AwaitingResponse,
    Rendered,
    Failed,
}

#[derive(Debug, Default)]
pub struct ChatSession {
    transcript: Transcript,
    settings: GenerationSettings,
    status: RequestStatus,
}

impl ChatSession {
    pub fn new(settings: GenerationSettings) -> Self {
        Self {
            transcript: Transcript::new(),
            settings,
            status: RequestStatus::Idle,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: GenerationSettings) {
        self.settings = settings;
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// User-initiated reset: empty transcript, back to idle.
    pub fn clear(&mut self) {
        self.transcript.clear();
        self.status = RequestStatus::Idle;
    }
}

/// Sends prompts upstream and records the outcome in a [`ChatSession`].
pub struct Dispatcher {
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
    events: Option<broadcast::Sender<SessionEvent>>,
}

impl Dispatcher {
    pub fn new(generator: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self {
            generator,
            timeout,
            events: None,
        }
    }

    /// Publishes transcript changes on `tx` as they happen.
    pub fn with_events(mut self, tx: broadcast::Sender<SessionEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn generator(&self) -> &Arc<dyn TextGenerator> {
        &self.generator
    }

    fn publish(&self, event: SessionEvent) {
        if let Some(tx) = &self.events {
            // No subscribers is fine.
            let _ = tx.send(event);
        }
    }

    /// Records `prompt` as a user turn, calls upstream once and appends the reply.
    ///
    /// Empty prompts are rejected before anything is recorded. On failure the
    /// user turn stays and no assistant turn is added.
    #[instrument(skip_all, fields(model = %settings.model()))]
    pub async fn send(
        &self,
        session: &mut ChatSession,
        prompt: &str,
        settings: &GenerationSettings,
    ) -> Result<String, ChatError> {
        let request = self.begin(session, prompt, settings)?;
        let outcome = self.call(&request).await;
        self.finish(session, outcome)
    }

    /// First half of [`Dispatcher::send`]: validates the prompt, records the
    /// user turn and moves the session to `AwaitingResponse`.
    ///
    /// The session does not need to stay borrowed while [`Dispatcher::call`]
    /// runs; a second `begin` before [`Dispatcher::finish`] fails with
    /// [`ChatError::Busy`].
    pub fn begin(
        &self,
        session: &mut ChatSession,
        prompt: &str,
        settings: &GenerationSettings,
    ) -> Result<GenerationRequest, ChatError> {
        if prompt.trim().is_empty() {
            debug!("Ignoring empty prompt");
            return Err(ChatError::EmptyInput);
        }
        if session.status == RequestStatus::AwaitingResponse {
            return Err(ChatError::Busy);
        }

        let user_turn = TurnView::from(session.transcript.append(Role::User, prompt));
        self.publish(SessionEvent::TurnAppended(user_turn));
        session.status = RequestStatus::AwaitingResponse;

        Ok(GenerationRequest {
            model: settings.model(),
            prompt: prompt.to_string(),
            max_output_tokens: settings.max_output_tokens(),
            temperature: settings.temperature(),
        })
    }

    /// The upstream call, bounded by the dispatcher timeout. Touches no session state.
    pub async fn call(&self, request: &GenerationRequest) -> Result<String, UpstreamError> {
        match tokio::time::timeout(self.timeout, self.generator.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(self.timeout)),
        }
    }

    /// Second half of [`Dispatcher::send`]: records the outcome of [`Dispatcher::call`].
    pub fn finish(
        &self,
        session: &mut ChatSession,
        outcome: Result<String, UpstreamError>,
    ) -> Result<String, ChatError> {
        match outcome {
            Ok(text) => {
                let reply = TurnView::from(session.transcript.append(Role::Assistant, text.as_str()));
                self.publish(SessionEvent::TurnAppended(reply));
                session.status = RequestStatus::Rendered;
                info!(message_count = session.transcript.message_count(), "Assistant reply recorded");
                Ok(text)
            }
            Err(e) => {
                warn!(error = %e, "Upstream request failed");
                session.status = RequestStatus::Failed;
                self.publish(SessionEvent::RequestFailed {
                    message: e.to_string(),
                });
                Err(ChatError::Upstream(e))
            }
        }
    }

    /// [`Dispatcher::send`] with the session's current settings.
    pub async fn submit(&self, session: &mut ChatSession, prompt: &str) -> Result<String, ChatError> {
        let settings = session.settings().clone();
        self.send(session, prompt, &settings).await
    }

    /// Empties the transcript. Refused while a reply is still pending.
    pub fn clear(&self, session: &mut ChatSession) -> Result<(), ChatError> {
        if session.status == RequestStatus::AwaitingResponse {
            return Err(ChatError::Busy);
        }
        session.clear();
        self.publish(SessionEvent::Cleared);
        Ok(())
    }

    pub fn update_settings(
        &self,
        session: &mut ChatSession,
        update: &SettingsUpdate,
    ) -> Result<GenerationSettings, ChatError> {
        let settings = session.settings().apply(update)?;
        session.set_settings(settings.clone());
        self.publish(SessionEvent::SettingsChanged(settings.clone()));
        Ok(settings)
    }
}

/// Options for the terminal chat loop.
#[derive(Debug, Clone)]
pub struct ReplOptions {
    /// Reveal replies a few characters at a time.
    pub typing: bool,
    pub chars_per_frame: usize,
    pub frame_delay: Duration,
}

impl Default for ReplOptions {
    fn default() -> Self {
        Self {
            typing: true,
            chars_per_frame: 3,
            frame_delay: Duration::from_millis(15),
        }
    }
}

const REPL_HELP: &str = "Commands:
  /clear              clear the chat history
  /model <name>       switch model
  /temperature <x>    set creativity level (0.0 - 1.0)
  /history            show the whole conversation
  /quit               leave the chat";

enum ReplCommand<'a> {
    Clear,
    Model(&'a str),
    Temperature(&'a str),
    History,
    Help,
    Quit,
}

/// Only known command names are intercepted; any other line, including one
/// that happens to start with `/`, is a prompt.
fn parse_command(line: &str) -> Option<ReplCommand<'_>> {
    let rest = line.strip_prefix('/')?;
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    Some(match name {
        "clear" => ReplCommand::Clear,
        "model" => ReplCommand::Model(arg),
        "temperature" | "temp" => ReplCommand::Temperature(arg),
        "history" => ReplCommand::History,
        "help" => ReplCommand::Help,
        "quit" | "exit" => ReplCommand::Quit,
        _ => return None,
    })
}

/// Interactive terminal chat. Reads one line at a time and only reads the next
/// line once the previous request has finished.
pub async fn run_interactive_chat<R, W>(
    dispatcher: &Dispatcher,
    session: &mut ChatSession,
    input: R,
    out: &mut W,
    options: &ReplOptions,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    info!("Starting interactive chat session...");
    writeln!(
        out,
        "MindSeek chat ({}). Type /help for commands.",
        session.settings().model()
    )?;

    let mut lines = input.lines();
    loop {
        write!(out, "> ")?;
        out.flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        if let Some(command) = parse_command(line.trim()) {
            match command {
                ReplCommand::Quit => break,
                ReplCommand::Help => writeln!(out, "{}", REPL_HELP)?,
                ReplCommand::Clear => match dispatcher.clear(session) {
                    Ok(()) => writeln!(out, "Chat history cleared.")?,
                    Err(e) => writeln!(out, "Error: {}", e)?,
                },
                ReplCommand::History => {
                    writeln!(out, "{}", render::render_plain(session.transcript()))?;
                    writeln!(out, "Total messages: {}", session.transcript().message_count())?;
                }
                ReplCommand::Model(name) => {
                    let update = SettingsUpdate {
                        model: Some(name.to_string()),
                        ..Default::default()
                    };
                    match dispatcher.update_settings(session, &update) {
                        Ok(settings) => writeln!(out, "Model set to {}", settings.model())?,
                        Err(e) => writeln!(out, "Error: {}", e)?,
                    }
                }
                ReplCommand::Temperature(value) => match value.parse::<f32>() {
                    Ok(temperature) => {
                        let update = SettingsUpdate {
                            temperature: Some(temperature),
                            ..Default::default()
                        };
                        match dispatcher.update_settings(session, &update) {
                            Ok(settings) => writeln!(out, "Temperature set to {:.1}", settings.temperature())?,
                            Err(e) => writeln!(out, "Error: {}", e)?,
                        }
                    }
                    Err(_) => writeln!(out, "Error: '{}' is not a number", value)?,
                },
            }
            continue;
        }

        match dispatcher.submit(session, &line).await {
            Ok(reply) => write_reply(out, &reply, options).await?,
            Err(e) if e.is_silent() => {}
            Err(e) => {
                writeln!(out, "Error: {}", e)?;
                writeln!(
                    out,
                    "There was an error connecting to the AI service. Please check your API key and try again."
                )?;
            }
        }
    }

    info!("Chat session finished.");
    Ok(())
}

async fn write_reply<W: Write>(out: &mut W, reply: &str, options: &ReplOptions) -> Result<()> {
    if !options.typing {
        writeln!(out, "{}: {}", ASSISTANT_NAME, reply)?;
        return Ok(());
    }

    // Each frame is a longer prefix; only print the new tail.
    write!(out, "{}: ", ASSISTANT_NAME)?;
    let mut shown = 0;
    for frame in TypingFrames::new(reply, options.chars_per_frame) {
        write!(out, "{}", &frame[shown..])?;
        out.flush()?;
        shown = frame.len();
        tokio::time::sleep(options.frame_delay).await;
    }
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Stub upstream with canned results, counting calls.
    struct StubGenerator {
        replies: Mutex<Vec<Result<String, UpstreamError>>>,
        calls: AtomicUsize,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    impl StubGenerator {
        fn new(replies: Vec<Result<String, UpstreamError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextGenerator for StubGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request.clone());
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Err(UpstreamError::EmptyResponse)
            } else {
                replies.remove(0)
            }
        }

        async fn list_models(&self) -> Result<Vec<String>, UpstreamError> {
            Ok(vec!["gemini-2.5-flash".to_string()])
        }
    }

    struct SlowGenerator;

    #[async_trait]
    impl TextGenerator for SlowGenerator {
        async fn generate(&self, _request: &GenerationRequest) -> Result<String, UpstreamError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".to_string())
        }

        async fn list_models(&self) -> Result<Vec<String>, UpstreamError> {
            Ok(Vec::new())
        }
    }

    fn dispatcher(stub: &Arc<StubGenerator>) -> Dispatcher {
        Dispatcher::new(stub.clone(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_empty_prompt_never_calls_upstream() {
        let stub = StubGenerator::new(vec![Ok("unused".to_string())]);
        let dispatcher = dispatcher(&stub);
        let mut session = ChatSession::default();

        for prompt in ["", "   ", "\n\t"] {
            let err = dispatcher.submit(&mut session, prompt).await.unwrap_err();
            assert!(matches!(err, ChatError::EmptyInput));
        }
        assert!(session.transcript().is_empty());
        assert_eq!(session.status(), RequestStatus::Idle);
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn test_successful_send_appends_user_then_assistant() {
        let stub = StubGenerator::new(vec![Ok("4".to_string())]);
        let dispatcher = dispatcher(&stub);
        let mut session = ChatSession::default();

        let reply = dispatcher.submit(&mut session, "2+2?").await.unwrap();
        assert_eq!(reply, "4");

        let turns = session.transcript().all();
        assert_eq!(turns.len(), 2);
        assert_eq!((turns[0].role(), turns[0].content()), (Role::User, "2+2?"));
        assert_eq!((turns[1].role(), turns[1].content()), (Role::Assistant, "4"));
        assert_eq!(session.transcript().message_count(), 2);
        assert_eq!(session.status(), RequestStatus::Rendered);
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_send_keeps_user_turn_only() {
        let stub = StubGenerator::new(vec![Err(UpstreamError::HttpStatus {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal".to_string(),
        })]);
        let dispatcher = dispatcher(&stub);
        let mut session = ChatSession::default();

        let err = dispatcher.submit(&mut session, "2+2?").await.unwrap_err();
        assert!(matches!(err, ChatError::Upstream(UpstreamError::HttpStatus { .. })));

        let turns = session.transcript().all();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role(), Role::User);
        assert_eq!(turns[0].content(), "2+2?");
        assert_eq!(session.status(), RequestStatus::Failed);
    }

    #[tokio::test]
    async fn test_empty_reply_is_upstream_error() {
        let stub = StubGenerator::new(vec![Err(UpstreamError::EmptyResponse)]);
        let dispatcher = dispatcher(&stub);
        let mut session = ChatSession::default();

        let err = dispatcher.submit(&mut session, "2+2?").await.unwrap_err();
        assert!(matches!(err, ChatError::Upstream(UpstreamError::EmptyResponse)));
        assert_eq!(session.transcript().message_count(), 1);
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        let dispatcher = Dispatcher::new(Arc::new(SlowGenerator), Duration::from_millis(50));
        let mut session = ChatSession::default();

        let err = dispatcher.submit(&mut session, "hello").await.unwrap_err();
        assert!(matches!(err, ChatError::Upstream(UpstreamError::Timeout(_))));
        assert_eq!(session.transcript().message_count(), 1);
        assert_eq!(session.status(), RequestStatus::Failed);
    }

    #[tokio::test]
    async fn test_send_uses_given_settings() {
        let stub = StubGenerator::new(vec![Ok("ok".to_string())]);
        let dispatcher = dispatcher(&stub);
        let mut session = ChatSession::default();
        let settings =
            GenerationSettings::new(crate::gemini::GeminiModel::Gemini15Pro, 42, 0.1).unwrap();

        dispatcher.send(&mut session, "hi", &settings).await.unwrap();

        let seen = stub.seen.lock().unwrap();
        assert_eq!(seen[0].model, crate::gemini::GeminiModel::Gemini15Pro);
        assert_eq!(seen[0].max_output_tokens, 42);
        assert_eq!(seen[0].prompt, "hi");
    }

    #[tokio::test]
    async fn test_same_prompt_twice_gives_two_exchanges() {
        let stub = StubGenerator::new(vec![Ok("a".to_string()), Ok("b".to_string())]);
        let dispatcher = dispatcher(&stub);
        let mut session = ChatSession::default();

        dispatcher.submit(&mut session, "again").await.unwrap();
        dispatcher.submit(&mut session, "again").await.unwrap();
        assert_eq!(session.transcript().message_count(), 4);
        assert_eq!(stub.calls(), 2);
    }

    #[tokio::test]
    async fn test_events_follow_transcript_changes() {
        let stub = StubGenerator::new(vec![Ok("4".to_string()), Err(UpstreamError::EmptyResponse)]);
        let (tx, mut rx) = broadcast::channel(16);
        let dispatcher = dispatcher(&stub).with_events(tx);
        let mut session = ChatSession::default();

        dispatcher.submit(&mut session, "2+2?").await.unwrap();
        let _ = dispatcher.submit(&mut session, "again").await;
        dispatcher.clear(&mut session).unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                SessionEvent::TurnAppended(view) => format!("turn:{}", view.content),
                SessionEvent::RequestFailed { .. } => "failed".to_string(),
                SessionEvent::Cleared => "cleared".to_string(),
                SessionEvent::SettingsChanged(_) => "settings".to_string(),
            });
        }
        assert_eq!(kinds, vec!["turn:2+2?", "turn:4", "turn:again", "failed", "cleared"]);
        assert_eq!(session.status(), RequestStatus::Idle);
    }

    #[tokio::test]
    async fn test_session_is_free_between_begin_and_finish() {
        let stub = StubGenerator::new(vec![Ok("4".to_string())]);
        let dispatcher = dispatcher(&stub);
        let mut session = ChatSession::default();
        let settings = session.settings().clone();

        let request = dispatcher.begin(&mut session, "2+2?", &settings).unwrap();
        assert_eq!(session.status(), RequestStatus::AwaitingResponse);
        assert_eq!(session.transcript().message_count(), 1);

        // A second prompt and a clear are both refused while the reply is pending.
        let err = dispatcher.begin(&mut session, "another", &settings).unwrap_err();
        assert!(matches!(err, ChatError::Busy));
        assert!(matches!(dispatcher.clear(&mut session), Err(ChatError::Busy)));
        assert_eq!(session.transcript().message_count(), 1);

        // Settings may still change; the pending request keeps its own copy.
        let update = SettingsUpdate {
            temperature: Some(0.1),
            ..Default::default()
        };
        dispatcher.update_settings(&mut session, &update).unwrap();

        let outcome = dispatcher.call(&request).await;
        let reply = dispatcher.finish(&mut session, outcome).unwrap();
        assert_eq!(reply, "4");
        assert_eq!(session.status(), RequestStatus::Rendered);
        assert_eq!(session.transcript().message_count(), 2);
        assert!((stub.seen.lock().unwrap()[0].temperature - 0.7).abs() < f32::EPSILON);

        dispatcher.clear(&mut session).unwrap();
        assert!(session.transcript().is_empty());
    }

    #[test]
    fn test_only_known_commands_are_intercepted() {
        assert!(matches!(parse_command("/clear"), Some(ReplCommand::Clear)));
        assert!(matches!(parse_command("/model gemini-1.5-pro"), Some(ReplCommand::Model("gemini-1.5-pro"))));
        assert!(parse_command("/r/rust is great?").is_none());
        assert!(parse_command("/etc/hosts looks odd").is_none());
        assert!(parse_command("hello").is_none());
    }

    #[tokio::test]
    async fn test_repl_runs_commands_and_prompts() {
        let stub = StubGenerator::new(vec![Ok("4".to_string()), Ok("it is".to_string())]);
        let dispatcher = dispatcher(&stub);
        let mut session = ChatSession::default();
        let input: &[u8] =
            b"\n/temperature 0.3\n2+2?\n/r/rust is great?\n/history\n/model nope\n/quit\nnever sent\n";
        let mut out = Vec::new();
        let options = ReplOptions {
            typing: false,
            ..Default::default()
        };

        run_interactive_chat(&dispatcher, &mut session, input, &mut out, &options)
            .await
            .unwrap();

        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("Temperature set to 0.3"));
        assert!(out.contains("MindSeek AI: 4"));
        assert!(out.contains("MindSeek AI: it is"));
        assert!(out.contains("Total messages: 4"));
        assert!(out.contains("unknown model 'nope'"));
        assert_eq!(stub.calls(), 2);
        assert_eq!(session.transcript().message_count(), 4);
        assert_eq!(session.transcript().all()[2].content(), "/r/rust is great?");
    }

    #[tokio::test]
    async fn test_repl_reports_upstream_errors_and_continues() {
        let stub = StubGenerator::new(vec![Err(UpstreamError::EmptyResponse), Ok("second".to_string())]);
        let dispatcher = dispatcher(&stub);
        let mut session = ChatSession::default();
        let input: &[u8] = b"first\nsecond try\n";
        let mut out = Vec::new();
        let options = ReplOptions {
            typing: true,
            chars_per_frame: 2,
            frame_delay: Duration::from_millis(0),
        };

        run_interactive_chat(&dispatcher, &mut session, input, &mut out, &options)
            .await
            .unwrap();

        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("Sorry, I couldn't generate a response"));
        assert!(out.contains("MindSeek AI: second"));
        assert_eq!(session.transcript().message_count(), 3);
    }
}
