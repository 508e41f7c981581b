//! Leading command token parsing

/// Command used when the prompt does not start with one
pub const DEFAULT_COMMAND: &str = "ask";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: String,
    /// Prompt text with the command token removed
    pub text: String,
}

/// Split a leading `/command` token off the prompt.
///
/// `"/run make a cube"` becomes `("run", "make a cube")`. Anything else,
/// including a bare `/`, is sent as `ask` with the text unchanged.
pub fn parse_command(prompt: &str) -> ParsedCommand {
    let trimmed = prompt.trim_start();
    if let Some(rest) = trimmed.strip_prefix('/') {
        let mut split = rest.splitn(2, char::is_whitespace);
        let token = split.next().unwrap_or_default();
        let is_command = !token.is_empty()
            && token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if is_command {
            return ParsedCommand {
                command: token.to_ascii_lowercase(),
                text: split.next().unwrap_or_default().trim().to_string(),
            };
        }
    }
    ParsedCommand {
        command: DEFAULT_COMMAND.to_string(),
        text: prompt.to_string(),
    }
}
