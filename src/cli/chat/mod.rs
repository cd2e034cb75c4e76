pub mod context;
pub mod controller;
pub mod conversation_state;
pub mod prompt;
pub mod render;

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use color_print::cformat;
use context::SessionContext;
use controller::{ChatController, ChatEvent, Rejection, Submission};
use eyre::Result;
use prompt::generate_prompt;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use crate::cli::insights::{DEFAULT_DASHBOARD_SUMMARY, print_insights};
use crate::gateway::AiGateway;

const WELCOME_TEXT: &str = "
Ask me about your dashboard, your data, or anything else.

Things to try
• What's driving my revenue this month?
• Give me three tips to improve conversion rate.
• Summarize what I should focus on today.

/help         Show the help dialogue
/quit         Quit the application
";

const HELP_TEXT: &str = "
Nexus AI Chat

/clear              Start a new conversation
/insights [DATA]    Generate insights for dashboard data (defaults to the sample figures)
/help               Show this help dialogue
/quit               Quit the application
";

pub struct ChatContext {
    output: Box<dyn Write>,
    input: Option<String>,
    interactive: bool,
    session: SessionContext,
    gateway: Arc<dyn AiGateway>,
    controller: ChatController,
    events: UnboundedReceiver<ChatEvent>,
}

impl ChatContext {
    pub fn new(
        output: Box<dyn Write>,
        input: Option<String>,
        interactive: bool,
        session: SessionContext,
        gateway: Arc<dyn AiGateway>,
    ) -> Self {
        let (controller, events) = new_session(&session, gateway.clone());

        Self {
            output,
            input,
            interactive,
            session,
            gateway,
            controller,
            events,
        }
    }

    pub async fn run(&mut self) -> Result<ExitCode> {
        if self.interactive {
            self.print_welcome()?;
        }

        // Handle non-interactive mode (single query)
        if let Some(input) = self.input.take() {
            return Ok(match self.process_chat_input(&input).await? {
                Submission::Rejected(_) => ExitCode::FAILURE,
                _ => ExitCode::SUCCESS,
            });
        }

        if self.interactive {
            self.run_interactive().await?;
        }

        Ok(ExitCode::SUCCESS)
    }

    fn print_welcome(&mut self) -> Result<()> {
        writeln!(
            self.output,
            "{}",
            cformat!("\n<magenta><bold>{}</></>", self.session.banner())
        )?;
        writeln!(self.output, "{}", WELCOME_TEXT)?;
        self.print_transcript()
    }

    fn print_transcript(&mut self) -> Result<()> {
        for message in self.controller.conversation().messages() {
            render::message(&mut self.output, &self.session, message)?;
        }
        Ok(())
    }

    async fn run_interactive(&mut self) -> Result<()> {
        let mut rl = prompt::rl(&self.session)?;

        loop {
            let prompt_text = generate_prompt(&self.session);
            let readline = rl.readline(&prompt_text);

            match readline {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }

                    rl.add_history_entry(line.as_str());

                    if line.trim() == "/quit" {
                        break;
                    }

                    if let Err(e) = self.handle_input(&line).await {
                        writeln!(self.output, "Error: {}", e)?;
                    }
                }
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
                Err(e) => {
                    writeln!(self.output, "Error: {}", e)?;
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_input(&mut self, input: &str) -> Result<()> {
        let trimmed = input.trim();

        match trimmed {
            "/help" => {
                writeln!(self.output, "{}", HELP_TEXT)?;
            }
            "/clear" => {
                (self.controller, self.events) = new_session(&self.session, self.gateway.clone());
                writeln!(self.output, "Conversation cleared.\n")?;
                self.print_transcript()?;
            }
            _ => {
                if let Some(summary) = insights_argument(trimmed) {
                    let summary = summary.unwrap_or(DEFAULT_DASHBOARD_SUMMARY);
                    print_insights(&mut self.output, self.gateway.as_ref(), summary).await?;
                } else if trimmed.starts_with('/') {
                    writeln!(
                        self.output,
                        "Unknown command: {}. Type /help to see what is available.",
                        trimmed
                    )?;
                } else {
                    self.process_chat_input(input).await?;
                }
            }
        }

        Ok(())
    }

    /// Submits `input` and renders the transcript as it changes, including
    /// while the reply is still pending.
    async fn process_chat_input(&mut self, input: &str) -> Result<Submission> {
        let Self {
            output,
            interactive,
            session,
            controller,
            events,
            ..
        } = self;

        controller.set_input(input);

        // The round has to reach `complete` even when the terminal stops
        // accepting output, so a render failure is held until the reply lands.
        let mut render_error = None;
        let submission = {
            let submit = controller.send();
            tokio::pin!(submit);

            loop {
                tokio::select! {
                    submission = &mut submit => break submission,
                    Some(event) = events.recv() => {
                        if render_error.is_none() {
                            render_error = render::event(output, session, &event, *interactive).err();
                        }
                    }
                }
            }
        };

        if let Some(e) = render_error {
            while events.try_recv().is_ok() {}
            return Err(e);
        }

        while let Ok(event) = events.try_recv() {
            render::event(output, session, &event, *interactive)?;
        }

        match &submission {
            Submission::Rejected(Rejection::EmptyInput) => {
                writeln!(output, "Nothing to send.")?;
            }
            Submission::Rejected(Rejection::Busy | Rejection::StaleRequest) => {
                writeln!(output, "Still waiting for the previous reply.")?;
            }
            Submission::Fallback(e) => debug!(
                "Reply replaced by fallback text ({} chars shown): {}",
                controller.conversation().last().map_or(0, |m| m.text().len()),
                e
            ),
            Submission::Answered => {}
        }

        debug!(
            "Round finished in state {:?} with {} messages",
            controller.status(),
            controller.conversation().len()
        );

        Ok(submission)
    }
}

fn new_session(
    session: &SessionContext,
    gateway: Arc<dyn AiGateway>,
) -> (ChatController, UnboundedReceiver<ChatEvent>) {
    let mut controller = ChatController::new(gateway, &session.greeting);
    let events = controller.subscribe();
    (controller, events)
}

/// Parses `/insights [DATA]`. The outer `Option` says whether the command
/// matched, the inner one whether data was given.
fn insights_argument(input: &str) -> Option<Option<&str>> {
    let rest = input.strip_prefix("/insights")?;
    if rest.is_empty() {
        return Some(None);
    }
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim();
    Some((!rest.is_empty()).then_some(rest))
}
