//! Turns Discord messages into transport-independent inbound events.

use serenity::model::channel::Message;

use crate::dialogue::{InboundContent, InboundEvent};

/// Builds the event for `msg`, or `None` if there's nothing in it we can act on.
///
/// An attachment wins over the text of the message; a reply wins over a command.
pub fn inbound_event(msg: &Message, call_token: char) -> Option<InboundEvent> {
    let display_name = msg.author.global_name.clone().unwrap_or_else(|| msg.author.name.clone());

    let content = if let Some(attachment) = msg.attachments.first() {
        InboundContent::Document {
            name: attachment.filename.clone(),
            size: u64::from(attachment.size),
            reference: attachment.url.clone(),
        }
    } else if let Some(replied) = &msg.referenced_message {
        InboundContent::Reply { to: replied.id.get(), text: msg.content.clone() }
    } else if !msg.content.trim().is_empty() {
        InboundContent::parse(&msg.content, call_token)
    } else {
        return None;
    };

    Some(InboundEvent { user: msg.author.id.get(), display_name, content })
}

/// Splits `text` into pieces of at most `max` bytes, preferring line breaks.
pub fn split_reply(text: &str, max: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.len() > max {
        let mut cut = max;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let cut = rest[..cut].rfind('\n').filter(|&newline| newline > 0).unwrap_or(cut);

        chunks.push(&rest[..cut]);
        rest = rest[cut..].trim_start_matches('\n');
    }

    if !rest.is_empty() {
        chunks.push(rest);
    }

    chunks
}
