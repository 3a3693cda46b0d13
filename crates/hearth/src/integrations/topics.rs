// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MQTT topic construction and parsing.

use regex::Regex;

/// `{prefix}/{serial}/{object_type}` or `{prefix}/{serial}/{object_type}/{field}`.
pub fn state_topic(prefix: &str, serial: &str, object_type: &str, field: Option<&str>) -> String {
    match field {
        Some(field) => format!("{prefix}/{serial}/{object_type}/{field}"),
        None => format!("{prefix}/{serial}/{object_type}"),
    }
}

/// `{prefix}/{serial}/availability`
pub fn availability_topic(prefix: &str, serial: &str) -> String {
    format!("{prefix}/{serial}/availability")
}

/// Subscription pattern matching every command topic under `prefix`.
pub fn command_pattern(prefix: &str) -> String {
    format!("{prefix}/+/+/+/set")
}

/// A parsed command topic: `{prefix}/{serial}/{object_type}/{field}/set`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub serial: String,
    pub object_type: String,
    pub field: String,
}

/// Compile the command-topic matcher for a prefix. Callers keep the compiled
/// regex around; command traffic is too frequent to recompile per message.
pub fn command_regex(prefix: &str) -> Option<Regex> {
    Regex::new(&format!("^{}/([^/]+)/([^/]+)/([^/]+)/set$", regex::escape(prefix))).ok()
}

/// Parse a command topic against a compiled matcher.
pub fn parse_command_topic(regex: &Regex, topic: &str) -> Option<Command> {
    let captures = regex.captures(topic)?;
    Some(Command {
        serial: captures.get(1)?.as_str().to_owned(),
        object_type: captures.get(2)?.as_str().to_owned(),
        field: captures.get(3)?.as_str().to_owned(),
    })
}

#[cfg(test)]
#[path = "topics_tests.rs"]
mod tests;
