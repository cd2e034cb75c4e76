use rustyline::{Config, Editor, Result};

use super::context::SessionContext;

pub fn generate_prompt(session: &SessionContext) -> String {
    format!("{} > ", session.user_name)
}

/// Line-editor settings for a chat session. History lives in memory only
/// and is dropped with the session.
pub fn editor_config(session: &SessionContext) -> Config {
    Config::builder()
        .max_history_size(session.history_size)
        .history_ignore_dups(true)
        .history_ignore_space(true)
        .build()
}

pub fn rl(session: &SessionContext) -> Result<Editor<()>> {
    Editor::with_config(editor_config(session))
}

#[cfg(test)]
mod tests {
    use rustyline::config::HistoryDuplicates;

    use super::*;

    fn session(history_size: usize) -> SessionContext {
        SessionContext {
            user_name: "alex".to_string(),
            assistant_name: "Nexus AI".to_string(),
            greeting: "Hello...".to_string(),
            model: "test-model".to_string(),
            history_size,
        }
    }

    #[test]
    fn prompt_names_the_user() {
        assert_eq!(generate_prompt(&session(10)), "alex > ");
    }

    #[test]
    fn editor_history_follows_the_session() {
        let config = editor_config(&session(25));
        assert_eq!(config.max_history_size(), 25);
        assert!(config.history_ignore_space());
        assert!(matches!(
            config.history_duplicates(),
            HistoryDuplicates::IgnoreConsecutive
        ));
    }
}
