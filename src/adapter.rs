//! Per-platform descriptors for the chat UIs we can capture from and inject into.
//!
//! Adding a platform means adding a [`Platform`] variant and its descriptor;
//! the scraper and injection engine never branch on the platform themselves.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::page::{NodeHandle, Page};

/// Matches any editable control when an adapter's own input selector misses.
pub const GENERIC_INPUT_SELECTOR: &str =
    r#"textarea, [contenteditable="true"], input[type="text"]"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    ChatGpt,
    Claude,
    Gemini,
}

impl Platform {
    pub fn display_name(self) -> &'static str {
        match self {
            Platform::ChatGpt => "ChatGPT",
            Platform::Claude => "Claude",
            Platform::Gemini => "Gemini",
        }
    }
}

/// How message nodes are found and how their role is inferred.
#[derive(Debug, Clone, Copy)]
pub struct MessageSelectors {
    /// Selects every message node at once.
    pub combined: &'static str,
    /// Attribute holding an explicit role, when the platform exposes one.
    pub role_attribute: Option<&'static str>,
    pub user: &'static str,
    pub assistant: &'static str,
}

/// Shape of the compose control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// `<textarea>` / `<input>`, written through the native value setter.
    FormField,
    /// contenteditable editor (ProseMirror, Quill) that only listens to input events.
    RichEditor,
}

#[derive(Debug, Clone, Copy)]
pub struct InputDescriptor {
    pub selector: &'static str,
    pub kind: InputKind,
}

#[derive(Debug, Clone, Copy)]
pub struct SendDescriptor {
    pub selector: &'static str,
}

/// How text is pulled out of one message node.
#[derive(Debug, Clone, Copy)]
pub enum TextRule {
    FullText,
    /// Prefer the first descendant matching the selector, else the full text.
    PreferDescendant(&'static str),
}

#[derive(Debug, Clone)]
pub struct Adapter {
    pub platform: Platform,
    pub host_patterns: &'static [&'static str],
    pub messages: MessageSelectors,
    pub input: InputDescriptor,
    pub send: SendDescriptor,
    pub text_rule: TextRule,
}

impl Adapter {
    pub fn id(&self) -> &'static str {
        match self.platform {
            Platform::ChatGpt => "chatgpt",
            Platform::Claude => "claude",
            Platform::Gemini => "gemini",
        }
    }

    pub fn name(&self) -> &'static str {
        self.platform.display_name()
    }

    pub fn claims(&self, hostname: &str) -> bool {
        self.host_patterns.iter().any(|p| hostname.contains(p))
    }

    pub fn locate_messages<P: Page>(&self, page: &P) -> Vec<NodeHandle> {
        page.query_all(self.messages.combined)
    }

    pub fn extract_text<P: Page>(&self, page: &P, node: NodeHandle) -> String {
        match self.text_rule {
            TextRule::FullText => page.text(node),
            TextRule::PreferDescendant(selector) => page
                .query_within(node, selector)
                .map(|inner| page.text(inner))
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| page.text(node)),
        }
    }

    pub fn locate_input<P: Page>(&self, page: &P) -> Option<NodeHandle> {
        page.query(self.input.selector)
    }

    pub fn locate_send_control<P: Page>(&self, page: &P) -> Option<NodeHandle> {
        page.query(self.send.selector)
    }
}

static ADAPTERS: Lazy<Vec<Adapter>> = Lazy::new(|| {
    vec![
        Adapter {
            platform: Platform::ChatGpt,
            host_patterns: &["chatgpt.com", "chat.openai.com"],
            messages: MessageSelectors {
                combined: "[data-message-author-role]",
                role_attribute: Some("data-message-author-role"),
                user: r#"[data-message-author-role="user"]"#,
                assistant: r#"[data-message-author-role="assistant"]"#,
            },
            input: InputDescriptor {
                selector: "#prompt-textarea",
                kind: InputKind::RichEditor,
            },
            send: SendDescriptor {
                selector: r#"button[data-testid="send-button"]"#,
            },
            text_rule: TextRule::PreferDescendant(".markdown, .whitespace-pre-wrap"),
        },
        Adapter {
            platform: Platform::Claude,
            host_patterns: &["claude.ai"],
            messages: MessageSelectors {
                combined: r#"[data-testid="user-message"], .font-claude-message"#,
                role_attribute: None,
                user: r#"[data-testid="user-message"]"#,
                assistant: ".font-claude-message",
            },
            input: InputDescriptor {
                selector: r#"div.ProseMirror[contenteditable="true"]"#,
                kind: InputKind::RichEditor,
            },
            send: SendDescriptor {
                selector: r#"button[aria-label="Send message"], button[aria-label="Send Message"]"#,
            },
            text_rule: TextRule::FullText,
        },
        Adapter {
            platform: Platform::Gemini,
            host_patterns: &["gemini.google.com"],
            messages: MessageSelectors {
                combined: "user-query, model-response",
                role_attribute: None,
                user: "user-query",
                assistant: "model-response",
            },
            input: InputDescriptor {
                selector: r#"rich-textarea .ql-editor, div.ql-editor[contenteditable="true"]"#,
                kind: InputKind::RichEditor,
            },
            send: SendDescriptor {
                selector: r#"button.send-button, button[aria-label="Send message"]"#,
            },
            text_rule: TextRule::PreferDescendant(".query-text, message-content"),
        },
    ]
});

/// Every registered adapter, in registration order.
pub fn all() -> &'static [Adapter] {
    &ADAPTERS
}

/// First adapter whose host patterns occur in `hostname`. An earlier adapter
/// shadows a later one that claims an overlapping host.
pub fn detect(hostname: &str) -> Option<&'static Adapter> {
    let hostname = hostname.to_ascii_lowercase();
    ADAPTERS.iter().find(|a| a.claims(&hostname))
}

/// Adapter for the page's current host.
pub fn detect_page<P: Page>(page: &P) -> Option<&'static Adapter> {
    detect(&page.hostname()?)
}
