//! Writes text into a platform's compose control and submits it.
//!
//! The native-setter write and the synthetic events are the fragile part of
//! talking to framework-rendered inputs; they stay behind [`inject`] and
//! [`trigger_send`] so nothing above this module sees DOM quirks.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::adapter::{Adapter, InputKind, GENERIC_INPUT_SELECTOR};
use crate::page::{DomEvent, NodeHandle, Page};

/// Time given to the host framework to process the input event and enable its
/// send button before we try to submit.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// How a submission was attempted. Neither variant confirms the platform
/// actually sent the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendAttempt {
    Clicked,
    EnterKey,
    NoTarget,
}

/// Finds the compose control, the adapter's own selector first, then any
/// editable element.
pub fn locate_input<P: Page>(page: &P, adapter: &Adapter) -> Option<(NodeHandle, InputKind)> {
    if let Some(node) = adapter.locate_input(page) {
        return Some((node, control_kind(page, node).unwrap_or(adapter.input.kind)));
    }
    debug!(adapter = adapter.id(), "input selector missed, trying generic editable search");
    page.query_all(GENERIC_INPUT_SELECTOR)
        .into_iter()
        .find_map(|node| control_kind(page, node).map(|kind| (node, kind)))
}

/// Shape of an element as a compose control, if it is one.
pub fn control_kind<P: Page>(page: &P, node: NodeHandle) -> Option<InputKind> {
    match page.tag_name(node).as_str() {
        "textarea" | "input" => Some(InputKind::FormField),
        _ if page
            .attr(node, "contenteditable")
            .is_some_and(|v| v.is_empty() || v.eq_ignore_ascii_case("true")) =>
        {
            Some(InputKind::RichEditor)
        }
        _ => None,
    }
}

/// Writes `text` into the compose control. `false` means no control was found
/// and the caller should fall back to the clipboard.
pub fn inject<P: Page>(page: &P, adapter: &Adapter, text: &str) -> bool {
    let Some((node, kind)) = locate_input(page, adapter) else {
        warn!(adapter = adapter.id(), "no compose control found");
        return false;
    };

    match kind {
        InputKind::FormField => {
            page.focus(node);
            page.set_value_native(node, text);
            page.dispatch(
                node,
                DomEvent::Input {
                    input_type: None,
                    data: None,
                },
            );
            page.dispatch(node, DomEvent::Change);
        }
        InputKind::RichEditor => {
            page.focus(node);
            page.replace_content(node, text);
            page.dispatch(node, DomEvent::insert_text(text));
        }
    }
    info!(adapter = adapter.id(), ?kind, chars = text.chars().count(), "injected text");
    true
}

/// Waits `settle`, then clicks the send control if it exists and is enabled,
/// otherwise presses Enter in the compose control.
pub async fn trigger_send<P: Page>(page: &P, adapter: &Adapter, settle: Duration) -> SendAttempt {
    if !settle.is_zero() {
        tokio::time::sleep(settle).await;
    }
    send_now(page, adapter)
}

pub fn send_now<P: Page>(page: &P, adapter: &Adapter) -> SendAttempt {
    if let Some(button) = adapter.locate_send_control(page) {
        if !page.is_disabled(button) {
            page.click(button);
            debug!(adapter = adapter.id(), "clicked send control");
            return SendAttempt::Clicked;
        }
        debug!(adapter = adapter.id(), "send control disabled, falling back to Enter");
    }

    match locate_input(page, adapter) {
        Some((node, _)) => {
            page.dispatch(node, DomEvent::enter());
            SendAttempt::EnterKey
        }
        None => SendAttempt::NoTarget,
    }
}
