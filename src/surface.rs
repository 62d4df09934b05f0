use std::cell::RefCell;

use tracing::info;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Save,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Error,
    Info,
}

/// Page-side collaborators the orchestrator drives: the two trigger
/// controls, the toast area and the clipboard.
pub trait Surface {
    fn attach_triggers(&self);

    fn set_trigger_enabled(&self, trigger: Trigger, enabled: bool);

    fn toast(&self, kind: ToastKind, message: &str);

    fn copy_to_clipboard(&self, text: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    Attached,
    TriggerEnabled(Trigger, bool),
    Toast(ToastKind, String),
    Copied(String),
}

/// Keeps every call in order. Doubles as a headless surface that only logs.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    events: RefCell<Vec<SurfaceEvent>>,
    clipboard_fails: bool,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// A surface whose clipboard writes are refused.
    pub fn without_clipboard() -> Self {
        Self {
            clipboard_fails: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.events.borrow().clone()
    }

    pub fn toasts(&self) -> Vec<(ToastKind, String)> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                SurfaceEvent::Toast(kind, msg) => Some((*kind, msg.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn last_toast(&self) -> Option<(ToastKind, String)> {
        self.toasts().pop()
    }

    pub fn clipboard(&self) -> Option<String> {
        self.events.borrow().iter().rev().find_map(|e| match e {
            SurfaceEvent::Copied(text) => Some(text.clone()),
            _ => None,
        })
    }

    pub fn attach_count(&self) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| matches!(e, SurfaceEvent::Attached))
            .count()
    }

    /// Last enabled state recorded for `trigger`.
    pub fn trigger_enabled(&self, trigger: Trigger) -> Option<bool> {
        self.events.borrow().iter().rev().find_map(|e| match e {
            SurfaceEvent::TriggerEnabled(t, enabled) if *t == trigger => Some(*enabled),
            _ => None,
        })
    }

    fn record(&self, event: SurfaceEvent) {
        self.events.borrow_mut().push(event);
    }
}

impl Surface for RecordingSurface {
    fn attach_triggers(&self) {
        self.record(SurfaceEvent::Attached);
    }

    fn set_trigger_enabled(&self, trigger: Trigger, enabled: bool) {
        self.record(SurfaceEvent::TriggerEnabled(trigger, enabled));
    }

    fn toast(&self, kind: ToastKind, message: &str) {
        info!(?kind, message, "toast");
        self.record(SurfaceEvent::Toast(kind, message.to_string()));
    }

    fn copy_to_clipboard(&self, text: &str) -> Result<()> {
        if self.clipboard_fails {
            return Err(AppError::Clipboard("permission denied".to_string()));
        }
        self.record(SurfaceEvent::Copied(text.to_string()));
        Ok(())
    }
}
