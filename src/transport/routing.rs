//! Destination naming: how message type names map onto broker entities.
//!
//! Every process on the bus derives the same names from the same message
//! type, so senders and handlers never have to agree on anything else.

use super::{Destination, Source};
use crate::message::MessageKind;

const QUEUE_PREFIX: &str = "q.";
const TOPIC_PREFIX: &str = "t.";
const REPLY_PREFIX: &str = "r.";

/// Normalise a name into the character set brokers accept in entity paths.
///
/// Lowercases, keeps `[a-z0-9._-]`, maps everything else (`::`, spaces,
/// generics) to `.` and collapses runs of separators.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        let mapped = match ch {
            'a'..='z' | '0'..='9' | '_' | '-' => ch,
            'A'..='Z' => ch.to_ascii_lowercase(),
            _ => '.',
        };
        if mapped == '.' && (out.is_empty() || out.ends_with('.')) {
            continue;
        }
        out.push(mapped);
    }
    while out.ends_with('.') {
        out.pop();
    }
    out
}

/// Queue that commands of this type are sent to.
pub fn command_queue(message_type: &str) -> String {
    format!("{QUEUE_PREFIX}{}", sanitize(message_type))
}

/// Queue that requests of this type are sent to.
pub fn request_queue(message_type: &str) -> String {
    command_queue(message_type)
}

/// Topic that events of this type are published to.
pub fn event_topic(message_type: &str) -> String {
    format!("{TOPIC_PREFIX}{}", sanitize(message_type))
}

/// Reply queue private to one process instance.
pub fn reply_queue(application: &str, instance: &str) -> String {
    format!("{REPLY_PREFIX}{}.{}", sanitize(application), sanitize(instance))
}

/// Subscription name shared by every instance of one application, so the
/// instances compete for each event instead of all receiving it.
pub fn competing_subscription(application: &str) -> String {
    sanitize(application)
}

/// Outbound destination for a message of the given kind.
///
/// Replies have no derived destination; they go to the request's reply-to.
pub fn destination_for(kind: MessageKind, message_type: &str) -> Option<Destination> {
    match kind {
        MessageKind::Command => Some(Destination::Queue(command_queue(message_type))),
        MessageKind::Request => Some(Destination::Queue(request_queue(message_type))),
        MessageKind::Event => Some(Destination::Topic(event_topic(message_type))),
        MessageKind::Reply => None,
    }
}

/// Inbound source an application consumes a handled message type from.
pub fn source_for(kind: MessageKind, message_type: &str, application: &str) -> Option<Source> {
    match kind {
        MessageKind::Command => Some(Source::Queue(command_queue(message_type))),
        MessageKind::Request => Some(Source::Queue(request_queue(message_type))),
        MessageKind::Event => Some(Source::Subscription {
            topic: event_topic(message_type),
            subscription: competing_subscription(application),
        }),
        MessageKind::Reply => None,
    }
}
