use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapter::Adapter;
use crate::page::{NodeHandle, Page};
use crate::sanitize::sanitize;

/// Turns captured on a save.
pub const DEFAULT_TURN_LIMIT: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }

    fn from_attribute(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" | "human" => Some(Role::User),
            "assistant" | "model" | "ai" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Reads the conversation currently on the page, keeping the last
/// `turn_limit` turns. An empty result means there is nothing to capture.
pub fn scrape<P: Page>(page: &P, adapter: &Adapter, turn_limit: usize) -> Vec<Message> {
    let mut messages = scrape_unified(page, adapter);
    if messages.is_empty() {
        debug!(adapter = adapter.id(), "unified selector found nothing, falling back to per-role queries");
        messages = scrape_by_role(page, adapter);
    }

    let keep = turn_limit.saturating_mul(2);
    if messages.len() > keep {
        let excess = messages.len() - keep;
        messages.drain(..excess);
    }
    debug!(adapter = adapter.id(), count = messages.len(), "scraped transcript");
    messages
}

fn scrape_unified<P: Page>(page: &P, adapter: &Adapter) -> Vec<Message> {
    adapter
        .locate_messages(page)
        .into_iter()
        .filter_map(|node| {
            let role = infer_role(page, adapter, node);
            to_message(page, adapter, node, role)
        })
        .collect()
}

fn infer_role<P: Page>(page: &P, adapter: &Adapter, node: NodeHandle) -> Role {
    let explicit = adapter
        .messages
        .role_attribute
        .and_then(|attr| page.attr(node, attr))
        .and_then(|value| Role::from_attribute(&value));

    explicit.unwrap_or_else(|| {
        if page.matches(node, adapter.messages.user) {
            Role::User
        } else {
            Role::Assistant
        }
    })
}

// Ordering by vertical position is best-effort: virtualized or absolutely
// positioned layouts can misorder.
fn scrape_by_role<P: Page>(page: &P, adapter: &Adapter) -> Vec<Message> {
    let mut positioned: Vec<(f64, NodeHandle, Message)> = Vec::new();
    for (selector, role) in [
        (adapter.messages.user, Role::User),
        (adapter.messages.assistant, Role::Assistant),
    ] {
        for node in page.query_all(selector) {
            if let Some(message) = to_message(page, adapter, node, role) {
                positioned.push((page.vertical_position(node), node, message));
            }
        }
    }
    positioned.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    positioned.into_iter().map(|(_, _, m)| m).collect()
}

fn to_message<P: Page>(page: &P, adapter: &Adapter, node: NodeHandle, role: Role) -> Option<Message> {
    let text = adapter.extract_text(page, node);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(Message::new(role, text))
}

/// Sanitizes each message and joins them into the role-labelled transcript
/// sent for summarization. Messages that sanitize to nothing are dropped.
pub fn build_transcript(messages: &[Message]) -> String {
    let mut result = String::new();
    for message in messages {
        let clean = sanitize(&message.content);
        if clean.is_empty() {
            continue;
        }
        if !result.is_empty() {
            result.push_str("\n\n");
        }
        result.push_str(message.role.label());
        result.push_str(": ");
        result.push_str(&clean);
    }
    result
}
