//! Lifecycle of one prompt-to-completion exchange.
//!
//! `start_stream` appends the user message and an assistant placeholder,
//! then spawns a reader task that decodes the response body and folds each
//! event into the placeholder. `cancel` stops that task, tells the backend to
//! stop out of band and marks the placeholder cancelled.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vibe_shared::schemas::{ChatRequest, ConversationSummary, Mode};
use vibe_shared::{Message, Role};

use crate::assembler::{self, PartAssembler, Step, StreamOutcome};
use crate::client::ApiClient;
use crate::config::Preferences;
use crate::conversation::{ConversationView, ViewEvent, ViewGuard, new_message_id, now_timestamp};
use crate::decoder::decode_stream;
use crate::error::{EnvoyError, EnvoyResult};

pub const CONNECTION_FAILED: &str = "Connection failed";
pub const STREAM_ENDED_EARLY: &str = "Stream ended before the response completed";

/// Everything one chat request needs.
#[derive(Debug, Clone)]
pub struct StreamParams {
    pub prompt: String,
    pub working_dir: String,
    pub model: String,
    pub mode: Mode,
    pub conversation_id: Option<String>,
}

impl From<StreamParams> for ChatRequest {
    fn from(params: StreamParams) -> Self {
        ChatRequest {
            prompt: params.prompt,
            working_dir: params.working_dir,
            model: params.model,
            mode: params.mode,
            conversation_id: params.conversation_id,
        }
    }
}

/// Handle to one in-flight stream.
#[derive(Clone)]
pub struct StreamHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    message_id: String,
    token: CancellationToken,
    outcome: watch::Sender<Option<StreamOutcome>>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl StreamHandle {
    /// Id of the assistant message this stream fills.
    pub fn message_id(&self) -> &str {
        &self.inner.message_id
    }

    pub fn outcome(&self) -> Option<StreamOutcome> {
        self.inner.outcome.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.outcome.borrow().is_some()
    }

    /// Resolve once the stream completes, errors or is cancelled.
    pub async fn wait(&self) -> StreamOutcome {
        let mut rx = self.inner.outcome.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(StreamOutcome::Cancelled),
            // The sender lives in `inner`, which we hold
            Err(_) => StreamOutcome::Cancelled,
        }
    }

    /// Record the outcome if none has been recorded yet.
    fn settle(&self, outcome: StreamOutcome) {
        self.inner.outcome.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(outcome);
            true
        });
    }
}

/// Owns the conversation view and drives streams into it.
pub struct SessionController {
    client: ApiClient,
    preferences: Preferences,
    view: ConversationView,
}

impl SessionController {
    pub fn new(client: ApiClient, preferences: Preferences) -> Self {
        Self {
            client,
            preferences,
            view: ConversationView::new(),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn view(&self) -> &ConversationView {
        &self.view
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    /// Takes effect for the next process; the running client keeps its base URL.
    pub fn set_server_url(&mut self, server_url: impl Into<String>) -> EnvoyResult<()> {
        self.preferences.set_server_url(server_url)
    }

    pub fn set_model(&mut self, model: impl Into<String>) -> EnvoyResult<()> {
        self.preferences.set_model(model)
    }

    /// The working directory is locked once the conversation has messages.
    pub fn set_working_dir(&mut self, working_dir: impl Into<String>) -> EnvoyResult<()> {
        if !self.view.read(|state| state.is_empty()) {
            return Err(EnvoyError::WorkingDirLocked);
        }
        self.preferences.set_working_dir(working_dir)
    }

    /// Build request parameters from the current preferences and conversation.
    pub fn params(&self, prompt: impl Into<String>, mode: Mode) -> StreamParams {
        StreamParams {
            prompt: prompt.into(),
            working_dir: self.preferences.working_dir().to_string(),
            model: self.preferences.model().to_string(),
            mode,
            conversation_id: self.view.conversation_id(),
        }
    }

    pub fn send(&self, prompt: impl Into<String>, mode: Mode) -> EnvoyResult<StreamHandle> {
        self.start_stream(self.params(prompt, mode))
    }

    /// Start streaming a reply. Returns immediately; the view is updated as
    /// events arrive. Must be called from within a tokio runtime.
    pub fn start_stream(&self, params: StreamParams) -> EnvoyResult<StreamHandle> {
        let message_id = new_message_id();
        {
            let mut guard = self.view.lock();
            if guard.state.is_streaming() {
                return Err(EnvoyError::StreamInProgress);
            }
            guard.push(Message::new(
                new_message_id(),
                Role::User,
                params.prompt.clone(),
                now_timestamp(),
            ));
            guard.push(Message::placeholder(message_id.clone(), now_timestamp()));
        }

        let (outcome, _) = watch::channel(None);
        let handle = StreamHandle {
            inner: Arc::new(HandleInner {
                message_id,
                token: CancellationToken::new(),
                outcome,
                task: parking_lot::Mutex::new(None),
            }),
        };

        info!(
            conversation_id = params.conversation_id.as_deref().unwrap_or("<new>"),
            mode = %params.mode,
            "starting stream"
        );

        let reader = StreamReader {
            view: self.view.clone(),
            handle: handle.clone(),
            assembler: PartAssembler::new(),
        };
        let task = tokio::spawn(reader.run(self.client.clone(), params.into()));
        *handle.inner.task.lock() = Some(task);

        Ok(handle)
    }

    /// Stop a stream. Safe to call repeatedly or after the stream finished.
    pub fn cancel(&self, handle: &StreamHandle) {
        handle.inner.token.cancel();
        if let Some(task) = handle.inner.task.lock().take() {
            task.abort();
        }

        let mut guard = self.view.lock();
        if let Some(index) = guard.state.position(handle.message_id()) {
            let still_streaming = guard
                .state
                .message_mut(index)
                .is_some_and(|message| message.is_streaming);

            if still_streaming {
                if let Some(conversation_id) = guard.state.conversation_id() {
                    self.notify_backend_cancel(conversation_id.to_string());
                }
                if let Some(message) = guard.state.message_mut(index) {
                    let step = assembler::cancel_message(message);
                    finish(&guard, handle, index, step);
                }
            }
        }

        // No-op unless the message vanished before settling
        handle.settle(StreamOutcome::Cancelled);
    }

    fn notify_backend_cancel(&self, conversation_id: String) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = self.client.clone();
        runtime.spawn(async move {
            match client.cancel_execution(&conversation_id).await {
                Ok(reply) => debug!(%conversation_id, status = %reply.status, "backend cancel"),
                Err(e) => warn!(%conversation_id, error = %e, "failed to notify backend of cancel"),
            }
        });
    }

    /// Clear the view for a fresh conversation.
    pub fn new_conversation(&self) -> EnvoyResult<()> {
        if self.view.is_streaming() {
            return Err(EnvoyError::StreamInProgress);
        }
        self.view.clear();
        Ok(())
    }

    pub async fn list_conversations(&self) -> EnvoyResult<Vec<ConversationSummary>> {
        self.client.conversations().await
    }

    /// Load a stored conversation into the view and adopt its working directory.
    pub async fn open_conversation(&mut self, id: &str) -> EnvoyResult<()> {
        if self.view.is_streaming() {
            return Err(EnvoyError::StreamInProgress);
        }
        let record = self.client.conversation(id).await?;
        self.view.load(&record);
        self.preferences.set_working_dir(record.working_dir)
    }

    /// Delete a stored conversation; the view resets if it was the open one.
    pub async fn delete_conversation(&self, id: &str) -> EnvoyResult<()> {
        self.client.delete_conversation(id).await?;
        if self.view.conversation_id().as_deref() == Some(id) && !self.view.is_streaming() {
            self.view.clear();
        }
        Ok(())
    }
}

/// The task that owns the response body for one stream.
struct StreamReader {
    view: ConversationView,
    handle: StreamHandle,
    assembler: PartAssembler,
}

impl StreamReader {
    async fn run(mut self, client: ApiClient, request: ChatRequest) {
        let token = self.handle.inner.token.clone();

        let response = tokio::select! {
            _ = token.cancelled() => return,
            response = client.open_chat_stream(&request) => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.fail(failure_message(&e));
                return;
            }
        };

        let events = decode_stream(Box::pin(response.bytes_stream()));
        tokio::pin!(events);

        loop {
            let next = tokio::select! {
                _ = token.cancelled() => return,
                next = events.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    if self.deliver(event) {
                        return;
                    }
                }
                Some(Err(e)) => {
                    self.fail(failure_message(&EnvoyError::from(e)));
                    return;
                }
                None => {
                    self.fail(STREAM_ENDED_EARLY.to_string());
                    return;
                }
            }
        }
    }

    /// Fold one event into the view. Returns true once the stream is over.
    fn deliver(&mut self, event: vibe_shared::ProtocolEvent) -> bool {
        let mut guard = self.view.lock();
        // The conversation was cleared or replaced underneath us
        let Some(index) = guard.state.position(self.handle.message_id()) else {
            self.handle.settle(StreamOutcome::Cancelled);
            return true;
        };
        let Some(message) = guard.state.message_mut(index) else {
            return true;
        };

        match self.assembler.apply(message, event) {
            Step::Ignored => !message.is_streaming,
            Step::Started(conversation_id) => {
                guard.assign_conversation_id(conversation_id);
                false
            }
            Step::Appended(part) => {
                guard.publish(ViewEvent::PartAppended { message: index, part });
                false
            }
            Step::Updated(part) => {
                guard.publish(ViewEvent::PartUpdated { message: index, part });
                false
            }
            step @ Step::Finished(_) => {
                finish(&guard, &self.handle, index, step);
                true
            }
        }
    }

    fn fail(&mut self, error: String) {
        let mut guard = self.view.lock();
        let Some(index) = guard.state.position(self.handle.message_id()) else {
            self.handle.settle(StreamOutcome::Cancelled);
            return;
        };
        if let Some(message) = guard.state.message_mut(index) {
            let step = assembler::fail_message(message, error);
            finish(&guard, &self.handle, index, step);
        }
    }
}

fn finish(guard: &ViewGuard<'_>, handle: &StreamHandle, index: usize, step: Step) {
    let Step::Finished(outcome) = step else {
        return;
    };
    info!(?outcome, "stream finished");
    handle.settle(outcome.clone());
    guard.publish(ViewEvent::StreamFinished {
        message: index,
        outcome,
    });
}

fn failure_message(error: &EnvoyError) -> String {
    let message = error.to_string();
    if message.trim().is_empty() {
        CONNECTION_FAILED.to_string()
    } else {
        message
    }
}
