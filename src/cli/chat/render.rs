use std::io::Write;

use crossterm::style::{Stylize, style};
use eyre::Result;

use super::context::SessionContext;
use super::controller::{ChatEvent, SessionStatus};
use super::conversation_state::Message;
use crate::gateway::Role;

/// Writes one transcript entry: a "name HH:MM" header line, then the text.
pub fn message<W: Write + ?Sized>(
    output: &mut W,
    session: &SessionContext,
    message: &Message,
) -> Result<()> {
    let time = message.timestamp().format("%H:%M").to_string();

    let name = match message.role() {
        Role::User => style(session.user_name.as_str()).cyan().bold(),
        Role::Model => style(session.assistant_name.as_str()).magenta().bold(),
    };

    writeln!(output, "{} {}", name, style(time).dark_grey())?;
    writeln!(output, "{}", message.text())?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

/// Renders a controller event.
///
/// `echo_user` is off for one-shot runs, where the question is already on
/// the command line and only the answer should be printed.
pub fn event<W: Write + ?Sized>(
    output: &mut W,
    session: &SessionContext,
    event: &ChatEvent,
    echo_user: bool,
) -> Result<()> {
    match event {
        ChatEvent::MessageAppended(m) if m.role() == Role::User && !echo_user => Ok(()),
        ChatEvent::MessageAppended(m) => message(output, session, m),
        ChatEvent::StatusChanged(SessionStatus::Submitting) if echo_user => {
            writeln!(
                output,
                "{}",
                style(format!("{} is thinking...", session.assistant_name)).dim()
            )?;
            output.flush()?;
            Ok(())
        }
        ChatEvent::StatusChanged(_) => Ok(()),
    }
}
