//! Slash-command dispatch (spec §4.G step 1): a small table of
//! `/`-prefixed commands that bypass the backend entirely. Table-driven in
//! the same style as `pocketpaw-backends::ndjson`'s translator tables,
//! rather than a chain of `if content == "/x"`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlashCommand {
    Stop,
    Reset,
    Help,
}

const TABLE: &[(&str, SlashCommand)] = &[
    ("/stop", SlashCommand::Stop),
    ("/reset", SlashCommand::Reset),
    ("/help", SlashCommand::Help),
];

pub const HELP_TEXT: &str = "Available commands:\n\
  /stop  - cancel the in-flight reply for this conversation\n\
  /reset - clear this conversation's memory\n\
  /help  - show this message";

/// Recognizes a slash command, trimming trailing whitespace and matching
/// case-insensitively (`/Stop` and `/stop` are the same command). Returns
/// `None` for anything that isn't an exact match against the table -- a
/// message that merely starts with `/` but isn't a known command falls
/// through to the backend like any other message.
pub fn parse_slash(content: &str) -> Option<SlashCommand> {
    let normalized = content.trim().to_ascii_lowercase();
    TABLE.iter().find(|(cmd, _)| *cmd == normalized).map(|(_, cmd)| *cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_each_table_entry() {
        assert_eq!(parse_slash("/stop"), Some(SlashCommand::Stop));
        assert_eq!(parse_slash("/reset"), Some(SlashCommand::Reset));
        assert_eq!(parse_slash("/help"), Some(SlashCommand::Help));
    }

    #[test]
    fn is_case_insensitive_and_trims_whitespace() {
        assert_eq!(parse_slash("  /STOP  "), Some(SlashCommand::Stop));
    }

    #[test]
    fn unrecognized_slash_text_falls_through() {
        assert_eq!(parse_slash("/unknown"), None);
        assert_eq!(parse_slash("not a command"), None);
    }
}
