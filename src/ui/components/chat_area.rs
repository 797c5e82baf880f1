use chrono::{DateTime, Local, TimeZone, Utc};

use crate::common::ChatMessage;

/// `[HH:MM] Name: content (#id)`; messages not yet persisted have no suffix.
pub fn format_message(message: &ChatMessage, sender_name: &str) -> String {
    format_message_in(message, sender_name, &Local)
}

pub fn format_message_in<Tz: TimeZone>(
    message: &ChatMessage,
    sender_name: &str,
    zone: &Tz,
) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let time = local_time(message.timestamp, zone);
    match message.id {
        Some(id) => format!("[{time}] {sender_name}: {} (#{id})", message.content),
        None => format!("[{time}] {sender_name}: {}", message.content),
    }
}

fn local_time<Tz: TimeZone>(timestamp: DateTime<Utc>, zone: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    timestamp.with_timezone(zone).format("%H:%M").to_string()
}
