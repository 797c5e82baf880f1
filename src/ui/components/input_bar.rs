use crate::common::SessionCommand;

pub const HELP: &str = "Commands: /delete <ID>, /clear, /archive, /quit";

/// Turns one line typed on the chat screen into a session command. Anything
/// not starting with `/` is sent as a message, blank lines included.
pub fn parse_line(line: &str) -> Result<SessionCommand, String> {
    let trimmed = line.trim();
    let Some(command) = trimmed.strip_prefix('/') else {
        return Ok(SessionCommand::SendMessage(line.trim_end_matches(['\r', '\n']).to_string()));
    };

    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("quit"), None, _) => Ok(SessionCommand::Close),
        (Some("clear"), None, _) => Ok(SessionCommand::ClearConversation),
        (Some("archive"), None, _) => Ok(SessionCommand::ArchiveConversation),
        (Some("delete"), Some(id), None) => id
            .trim_start_matches('#')
            .parse()
            .map(SessionCommand::DeleteMessage)
            .map_err(|_| format!("`{id}` is not a message id")),
        (Some("delete"), _, _) => Err("usage: /delete <ID>".to_string()),
        _ => Err(format!("Unknown command `{trimmed}`. {HELP}")),
    }
}
