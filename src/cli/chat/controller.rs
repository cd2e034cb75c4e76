use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use super::conversation_state::{ConversationState, Message};
use crate::gateway::{AiGateway, CHAT_FALLBACK, GatewayError, HistoryEntry, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    /// A gateway call is in flight; new input is not accepted.
    Submitting,
}

/// Why a submission was turned away. A rejected submission changes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Busy,
    EmptyInput,
    /// The request was issued by another session or its round already closed.
    StaleRequest,
}

#[derive(Debug)]
pub enum Submission {
    Rejected(Rejection),
    Answered,
    /// The gateway failed and the fallback text was appended in its place.
    Fallback(GatewayError),
}

/// Emitted on every change to the transcript or the session status.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    MessageAppended(Message),
    StatusChanged(SessionStatus),
}

/// An accepted submission awaiting its reply.
///
/// `history` is the transcript as it was before the user message of this
/// round was appended.
#[derive(Debug)]
#[must_use]
pub struct PendingRequest {
    session_id: u64,
    prompt: String,
    history: Vec<HistoryEntry>,
}

impl PendingRequest {
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Drives one chat session: appends the user's message, asks the gateway for
/// a reply, appends the reply, and gates input while the call is outstanding.
pub struct ChatController {
    session_id: u64,
    gateway: Arc<dyn AiGateway>,
    conversation: ConversationState,
    status: SessionStatus,
    input: String,
    events: Option<UnboundedSender<ChatEvent>>,
}

impl ChatController {
    pub fn new(gateway: Arc<dyn AiGateway>, greeting: &str) -> Self {
        Self {
            session_id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            gateway,
            conversation: ConversationState::seeded(greeting),
            status: SessionStatus::Idle,
            input: String::new(),
            events: None,
        }
    }

    /// Returns a receiver for every subsequent [`ChatEvent`]. Only the most
    /// recent subscriber receives events.
    pub fn subscribe(&mut self) -> UnboundedReceiver<ChatEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    /// Submits the pending input draft.
    pub async fn send(&mut self) -> Submission {
        let text = self.input().to_string();
        self.submit(&text).await
    }

    /// Runs one full round: user message, gateway call, model reply.
    pub async fn submit(&mut self, text: &str) -> Submission {
        let pending = match self.begin_submit(text) {
            Ok(pending) => pending,
            Err(rejection) => return Submission::Rejected(rejection),
        };

        let reply = self
            .gateway
            .generate_ai_response(pending.prompt(), pending.history())
            .await;

        self.complete(pending, reply)
    }

    /// Moves `Idle` to `Submitting` if `text` is acceptable.
    pub fn begin_submit(&mut self, text: &str) -> Result<PendingRequest, Rejection> {
        if self.status == SessionStatus::Submitting {
            debug!("Rejecting submission while a reply is pending");
            return Err(Rejection::Busy);
        }
        if text.trim().is_empty() {
            return Err(Rejection::EmptyInput);
        }

        let history = self.conversation.to_history();

        self.append(Message::new(Role::User, text));
        self.input.clear();
        self.set_status(SessionStatus::Submitting);

        Ok(PendingRequest {
            session_id: self.session_id,
            prompt: text.to_string(),
            history,
        })
    }

    /// Moves back to `Idle`, appending the reply or the fallback text.
    ///
    /// A request that belongs to another controller, or that arrives while
    /// this one is idle, is rejected and the transcript is left untouched.
    pub fn complete(&mut self, pending: PendingRequest, reply: Result<String, GatewayError>) -> Submission {
        if pending.session_id != self.session_id || self.status != SessionStatus::Submitting {
            warn!("Ignoring reply to a request this session is not waiting on");
            return Submission::Rejected(Rejection::StaleRequest);
        }

        debug!(
            "Completing round for prompt of {} chars with {} history entries",
            pending.prompt().len(),
            pending.history().len()
        );

        let (text, submission) = match reply {
            Ok(text) => (text, Submission::Answered),
            Err(e) => {
                warn!("Gemini API error: {}", e);
                (CHAT_FALLBACK.to_string(), Submission::Fallback(e))
            }
        };

        self.append(Message::new(Role::Model, text));
        self.set_status(SessionStatus::Idle);

        submission
    }

    fn append(&mut self, message: Message) {
        self.conversation.append(message.clone());
        self.emit(ChatEvent::MessageAppended(message));
    }

    fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.emit(ChatEvent::StatusChanged(status));
    }

    fn emit(&self, event: ChatEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver just means nobody is rendering.
            let _ = tx.send(event);
        }
    }
}
