//! Turns typed lines into messages and received messages into printable lines

use shared::Message;

/// Prefix that marks a line as a server command
pub const COMMAND_PREFIX: char = '/';

/// Builds the message for one line of user input.
///
/// `/name` becomes a command request for `name`; anything else is sent as a
/// single-line text message. Blank lines produce nothing.
pub fn parse_line(line: &str, author: &str) -> Option<Message> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }

    match line.strip_prefix(COMMAND_PREFIX) {
        Some(command) => Some(Message::command(author, command.trim())),
        None => Some(Message::text(author, [line])),
    }
}

/// One `author: line` string per text entry
pub fn format_message(message: &Message) -> Vec<String> {
    message
        .text
        .iter()
        .map(|line| format!("{}: {}", message.author, line))
        .collect()
}
