//! In-page agent: wires the save and resume triggers to the scraper, the
//! injection engine and the background service.
//!
//! Each trigger runs `idle -> running -> idle`; while running, further presses
//! of the same trigger are ignored. Failures never escape a trigger handler,
//! they end up as a toast and an [`Outcome::Failed`].

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::adapter::{self, Adapter, Platform};
use crate::api::models::{CaptureRequest, Request};
use crate::channel::Transport;
use crate::error::{AppError, Result};
use crate::inject::{self, SendAttempt, DEFAULT_SETTLE_DELAY};
use crate::page::Page;
use crate::store::Summary;
use crate::surface::{Surface, ToastKind, Trigger};
use crate::transcript::{build_transcript, scrape, DEFAULT_TURN_LIMIT};

#[derive(Debug, Clone, Copy)]
pub struct ReadinessPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            attempts: 20,
            interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready { attempts: u32 },
    /// The compose control never showed up; activation goes ahead anyway.
    GaveUp { attempts: u32 },
}

/// Polls until the adapter's compose control exists, at most
/// `policy.attempts` times.
pub async fn wait_for_ready<P: Page>(page: &P, adapter: &Adapter, policy: ReadinessPolicy) -> Readiness {
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        if adapter.locate_input(page).is_some() {
            return Readiness::Ready { attempts: attempt };
        }
        if attempt < attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    Readiness::GaveUp { attempts }
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub turn_limit: usize,
    pub settle_delay: Duration,
    pub readiness: ReadinessPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            turn_limit: DEFAULT_TURN_LIMIT,
            settle_delay: DEFAULT_SETTLE_DELAY,
            readiness: ReadinessPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    Unsupported,
    AlreadyActive,
    Attached {
        platform: Platform,
        readiness: Readiness,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The trigger was already running.
    Ignored,
    Saved(Summary),
    Resumed { send: SendAttempt },
    /// No compose control: the handoff went to the clipboard instead.
    CopiedToClipboard,
    Failed(String),
}

/// Marks a trigger running and disabled; dropping it restores idle.
struct RunningGuard<'a, S: Surface + ?Sized> {
    state: &'a Cell<ActionState>,
    surface: &'a S,
    trigger: Trigger,
}

impl<'a, S: Surface + ?Sized> RunningGuard<'a, S> {
    fn begin(state: &'a Cell<ActionState>, surface: &'a S, trigger: Trigger) -> Option<Self> {
        if state.get() == ActionState::Running {
            debug!(?trigger, "trigger already running, ignoring");
            return None;
        }
        state.set(ActionState::Running);
        surface.set_trigger_enabled(trigger, false);
        Some(Self {
            state,
            surface,
            trigger,
        })
    }
}

impl<S: Surface + ?Sized> Drop for RunningGuard<'_, S> {
    fn drop(&mut self) {
        self.state.set(ActionState::Idle);
        self.surface.set_trigger_enabled(self.trigger, true);
    }
}

pub struct Orchestrator<T> {
    transport: T,
    config: OrchestratorConfig,
    active_identity: RefCell<Option<String>>,
    save_state: Cell<ActionState>,
    resume_state: Cell<ActionState>,
}

impl<T: Transport> Orchestrator<T> {
    pub fn new(transport: T, config: OrchestratorConfig) -> Self {
        Self {
            transport,
            config,
            active_identity: RefCell::new(None),
            save_state: Cell::new(ActionState::Idle),
            resume_state: Cell::new(ActionState::Idle),
        }
    }

    pub fn state(&self, trigger: Trigger) -> ActionState {
        match trigger {
            Trigger::Save => self.save_state.get(),
            Trigger::Resume => self.resume_state.get(),
        }
    }

    pub fn active_identity(&self) -> Option<String> {
        self.active_identity.borrow().clone()
    }

    /// Attaches the triggers once per page identity.
    pub async fn activate<P: Page, S: Surface + ?Sized>(&self, page: &P, surface: &S) -> Activation {
        let url = page.url();
        let Some(adapter) = adapter::detect_page(page) else {
            debug!(url = %url, "no adapter for page");
            self.active_identity.replace(None);
            return Activation::Unsupported;
        };

        if self.active_identity.borrow().as_deref() == Some(url.as_str()) {
            return Activation::AlreadyActive;
        }
        // Claim the identity before suspending so a concurrent activation backs off.
        self.active_identity.replace(Some(url.clone()));

        let readiness = wait_for_ready(page, adapter, self.config.readiness).await;
        if let Readiness::GaveUp { attempts } = readiness {
            warn!(adapter = adapter.id(), attempts, "compose control never appeared, attaching anyway");
        }

        surface.attach_triggers();
        self.refresh_resume_availability(surface).await;
        info!(adapter = adapter.id(), url = %url, "activated");
        Activation::Attached {
            platform: adapter.platform,
            readiness,
        }
    }

    /// Call when the page URL may have changed without a reload.
    pub async fn on_navigation<P: Page, S: Surface + ?Sized>(&self, page: &P, surface: &S) -> Option<Activation> {
        let url = page.url();
        if self.active_identity.borrow().as_deref() == Some(url.as_str()) {
            return None;
        }
        debug!(url = %url, "client-side navigation detected");
        Some(self.activate(page, surface).await)
    }

    /// Polls the page URL every `interval` and re-activates when it changes,
    /// until `stop` resolves. Returns how many times it attached.
    pub async fn watch_navigation<P, S, F>(&self, page: &P, surface: &S, interval: Duration, stop: F) -> usize
    where
        P: Page,
        S: Surface + ?Sized,
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(stop);

        let mut last_url = page.url();
        let mut attached = 0;
        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {
                    let url = page.url();
                    if url != last_url {
                        last_url = url;
                        if let Some(Activation::Attached { .. }) = self.on_navigation(page, surface).await {
                            attached += 1;
                        }
                    }
                }
            }
        }
        debug!(attached, "navigation watch stopped");
        attached
    }

    async fn refresh_resume_availability<S: Surface + ?Sized>(&self, surface: &S) {
        let enabled = match self.transport.send(Request::HasSavedState).await {
            Ok(reply) if reply.success => reply.has_saved.unwrap_or(false),
            Ok(reply) => {
                debug!(error = ?reply.error, "hasSavedState failed");
                true
            }
            Err(err) => {
                debug!(error = %err, "could not query saved state");
                true
            }
        };
        surface.set_trigger_enabled(Trigger::Resume, enabled);
    }

    pub async fn save<P: Page, S: Surface + ?Sized>(&self, page: &P, surface: &S) -> Outcome {
        let Some(_guard) = RunningGuard::begin(&self.save_state, surface, Trigger::Save) else {
            return Outcome::Ignored;
        };

        match self.capture(page).await {
            Ok(summary) => {
                surface.set_trigger_enabled(Trigger::Resume, true);
                surface.toast(
                    ToastKind::Success,
                    &format!("Context saved from {}. Open any chat and press resume to continue.", summary.platform),
                );
                Outcome::Saved(summary)
            }
            Err(err) => fail(surface, err),
        }
    }

    async fn capture<P: Page>(&self, page: &P) -> Result<Summary> {
        let adapter = adapter::detect_page(page).ok_or(AppError::UnsupportedPage)?;
        let messages = scrape(page, adapter, self.config.turn_limit);
        if messages.is_empty() {
            return Err(AppError::NothingToCapture);
        }
        let transcript = build_transcript(&messages);
        if transcript.is_empty() {
            return Err(AppError::NothingToCapture);
        }

        info!(adapter = adapter.id(), messages = messages.len(), "sending capture request");
        let reply = self
            .transport
            .send(Request::Summarize(CaptureRequest {
                conversation_text: transcript,
                platform_name: adapter.name().to_string(),
                source_url: page.url(),
                captured_at: Utc::now(),
            }))
            .await?;
        reply.into_data::<Summary>().map_err(AppError::Remote)
    }

    /// Injects the most recent handoff and submits it.
    pub async fn resume<P: Page, S: Surface + ?Sized>(&self, page: &P, surface: &S) -> Outcome {
        let Some(_guard) = RunningGuard::begin(&self.resume_state, surface, Trigger::Resume) else {
            return Outcome::Ignored;
        };

        let result = async {
            let reply = self.transport.send(Request::GetLastSave).await?;
            let summary = reply.into_data::<Summary>().map_err(AppError::Remote)?;
            self.deliver(page, surface, &summary.summary).await
        }
        .await;
        result.unwrap_or_else(|err| fail(surface, err))
    }

    /// Injects a chosen handoff, as picked from the history view.
    pub async fn resume_with<P: Page, S: Surface + ?Sized>(&self, page: &P, surface: &S, id: &str) -> Outcome {
        let Some(_guard) = RunningGuard::begin(&self.resume_state, surface, Trigger::Resume) else {
            return Outcome::Ignored;
        };

        let result = async {
            let reply = self.transport.send(Request::GetAllSaves).await?;
            let saves = reply.into_data::<Vec<Summary>>().map_err(AppError::Remote)?;
            let summary = saves
                .into_iter()
                .find(|s| s.id == id)
                .ok_or(AppError::NothingSaved)?;
            self.deliver(page, surface, &summary.summary).await
        }
        .await;
        result.unwrap_or_else(|err| fail(surface, err))
    }

    async fn deliver<P: Page, S: Surface + ?Sized>(&self, page: &P, surface: &S, text: &str) -> Result<Outcome> {
        let adapter = adapter::detect_page(page).ok_or(AppError::UnsupportedPage)?;

        if inject::inject(page, adapter, text) {
            let send = inject::trigger_send(page, adapter, self.config.settle_delay).await;
            surface.toast(ToastKind::Success, "Context restored.");
            return Ok(Outcome::Resumed { send });
        }

        surface.copy_to_clipboard(text)?;
        surface.toast(
            ToastKind::Info,
            "Couldn't find the chat input. The handoff is on your clipboard, paste it to continue.",
        );
        Ok(Outcome::CopiedToClipboard)
    }
}

fn fail<S: Surface + ?Sized>(surface: &S, err: AppError) -> Outcome {
    if err.is_no_op() {
        debug!(reason = %err, "nothing to do");
    } else {
        warn!(error = %err, "trigger failed");
    }
    let message = err.to_string();
    surface.toast(ToastKind::Error, &message);
    Outcome::Failed(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::response::Reply;
    use crate::page::HtmlPage;
    use crate::surface::{RecordingSurface, SurfaceEvent};

    /// Answers from a fixed closure, optionally after a delay, and records
    /// every request.
    struct ScriptedTransport<F> {
        respond: F,
        delay: Duration,
        sent: RefCell<Vec<Request>>,
    }

    impl<F: Fn(&Request) -> Reply> ScriptedTransport<F> {
        fn new(respond: F) -> Self {
            Self {
                respond,
                delay: Duration::ZERO,
                sent: RefCell::new(Vec::new()),
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn actions(&self) -> Vec<&'static str> {
            self.sent.borrow().iter().map(Request::action).collect()
        }
    }

    impl<F: Fn(&Request) -> Reply> Transport for ScriptedTransport<F> {
        async fn send(&self, request: Request) -> Result<Reply> {
            self.sent.borrow_mut().push(request.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok((self.respond)(&request))
        }
    }

    fn stored(text: &str) -> Summary {
        Summary::new(text.to_string(), "ChatGPT", "https://chatgpt.com/c/1", Utc::now())
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            turn_limit: 15,
            settle_delay: Duration::from_millis(1),
            readiness: ReadinessPolicy {
                attempts: 2,
                interval: Duration::from_millis(1),
            },
        }
    }

    const CHAT: &str = r#"<html><body>
        <div data-message-author-role="user">build a todo app</div>
        <div data-message-author-role="assistant"><div class="markdown">ok, using React</div></div>
        <div id="prompt-textarea" contenteditable="true"></div>
        <button data-testid="send-button">Send</button>
    </body></html>"#;

    #[tokio::test]
    async fn save_with_empty_page_never_contacts_service() {
        let transport = ScriptedTransport::new(|_: &Request| Reply::done());
        let orch = Orchestrator::new(transport, config());
        let page = HtmlPage::parse("https://chatgpt.com/", "<html><body></body></html>");
        let surface = RecordingSurface::new();

        let outcome = orch.save(&page, &surface).await;
        assert_eq!(outcome, Outcome::Failed("No conversation found to save".to_string()));
        assert!(orch.transport.actions().is_empty());
        assert_eq!(orch.state(Trigger::Save), ActionState::Idle);
        assert_eq!(surface.trigger_enabled(Trigger::Save), Some(true));
    }

    #[tokio::test]
    async fn save_sends_labelled_transcript() {
        let transport = ScriptedTransport::new(|req: &Request| match req {
            Request::Summarize(capture) => {
                let s = Summary::new("SYSTEM HANDOFF: todo".into(), &capture.platform_name, &capture.source_url, capture.captured_at);
                Reply::success(s).unwrap()
            }
            _ => Reply::failure("unexpected"),
        });
        let orch = Orchestrator::new(transport, config());
        let page = HtmlPage::parse("https://chatgpt.com/c/9", CHAT);
        let surface = RecordingSurface::new();

        let Outcome::Saved(summary) = orch.save(&page, &surface).await else {
            panic!("save should succeed");
        };
        assert_eq!(summary.platform, "ChatGPT");
        assert_eq!(summary.url, "https://chatgpt.com/c/9");
        match &orch.transport.sent.borrow()[0] {
            Request::Summarize(capture) => assert_eq!(
                capture.conversation_text,
                "User: build a todo app\n\nAssistant: ok, using React"
            ),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(surface.last_toast().unwrap().0, ToastKind::Success);
        assert_eq!(surface.trigger_enabled(Trigger::Resume), Some(true));
    }

    #[tokio::test]
    async fn service_failure_is_shown_verbatim() {
        let transport = ScriptedTransport::new(|_: &Request| Reply::from(AppError::MissingApiKey));
        let orch = Orchestrator::new(transport, config());
        let page = HtmlPage::parse("https://chatgpt.com/c/9", CHAT);
        let surface = RecordingSurface::new();

        let outcome = orch.save(&page, &surface).await;
        let expected = AppError::MissingApiKey.to_string();
        assert_eq!(outcome, Outcome::Failed(expected.clone()));
        assert_eq!(surface.last_toast(), Some((ToastKind::Error, expected)));
    }

    #[tokio::test]
    async fn repeated_trigger_while_running_is_ignored() {
        let transport = ScriptedTransport::new(|req: &Request| match req {
            Request::Summarize(_) => Reply::success(stored("SYSTEM HANDOFF: x")).unwrap(),
            _ => Reply::done(),
        })
        .slow(Duration::from_millis(20));
        let orch = Orchestrator::new(transport, config());
        let page = HtmlPage::parse("https://chatgpt.com/c/9", CHAT);
        let surface = RecordingSurface::new();

        let (first, second) = tokio::join!(orch.save(&page, &surface), orch.save(&page, &surface));
        assert!(matches!(first, Outcome::Saved(_)));
        assert_eq!(second, Outcome::Ignored);
        assert_eq!(orch.transport.actions(), vec!["summarize"]);
        assert_eq!(orch.state(Trigger::Save), ActionState::Idle);
    }

    #[tokio::test]
    async fn resume_injects_and_sends_once() {
        let transport = ScriptedTransport::new(|req: &Request| match req {
            Request::GetLastSave => Reply::success(stored("SYSTEM HANDOFF: continue the todo app")).unwrap(),
            _ => Reply::done(),
        });
        let orch = Orchestrator::new(transport, config());
        let page = HtmlPage::parse("https://chatgpt.com/", CHAT);
        let surface = RecordingSurface::new();

        let outcome = orch.resume(&page, &surface).await;
        assert_eq!(outcome, Outcome::Resumed { send: SendAttempt::Clicked });

        let editor = page.query("#prompt-textarea").unwrap();
        assert_eq!(page.control_text(editor), "SYSTEM HANDOFF: continue the todo app");
        let button = page.query("button").unwrap();
        assert_eq!(page.click_count(button), 1);
    }

    #[tokio::test]
    async fn resume_without_input_copies_to_clipboard() {
        let transport = ScriptedTransport::new(|_: &Request| Reply::success(stored("SYSTEM HANDOFF: paste me")).unwrap());
        let orch = Orchestrator::new(transport, config());
        let page = HtmlPage::parse("https://claude.ai/chat/1", "<html><body><p>loading</p></body></html>");
        let surface = RecordingSurface::new();

        let outcome = orch.resume(&page, &surface).await;
        assert_eq!(outcome, Outcome::CopiedToClipboard);
        assert_eq!(surface.clipboard().as_deref(), Some("SYSTEM HANDOFF: paste me"));
        assert_eq!(surface.last_toast().unwrap().0, ToastKind::Info);
    }

    #[tokio::test]
    async fn resume_without_input_or_clipboard_fails() {
        let transport = ScriptedTransport::new(|_: &Request| Reply::success(stored("SYSTEM HANDOFF: paste me")).unwrap());
        let orch = Orchestrator::new(transport, config());
        let page = HtmlPage::parse("https://claude.ai/chat/1", "<html><body><p>loading</p></body></html>");
        let surface = RecordingSurface::without_clipboard();

        let outcome = orch.resume(&page, &surface).await;
        assert_eq!(
            outcome,
            Outcome::Failed("Clipboard unavailable: permission denied".to_string())
        );
        assert_eq!(surface.clipboard(), None);
        assert_eq!(
            surface.last_toast(),
            Some((ToastKind::Error, "Clipboard unavailable: permission denied".to_string()))
        );
        assert_eq!(orch.state(Trigger::Resume), ActionState::Idle);
        assert_eq!(surface.trigger_enabled(Trigger::Resume), Some(true));
    }

    #[tokio::test]
    async fn resume_with_nothing_saved_fails() {
        let transport = ScriptedTransport::new(|_: &Request| Reply::from(AppError::NothingSaved));
        let orch = Orchestrator::new(transport, config());
        let page = HtmlPage::parse("https://chatgpt.com/", CHAT);
        let surface = RecordingSurface::new();

        let outcome = orch.resume(&page, &surface).await;
        assert_eq!(outcome, Outcome::Failed("No saved context found".to_string()));
        assert_eq!(orch.state(Trigger::Resume), ActionState::Idle);
    }

    #[tokio::test]
    async fn resume_with_picks_the_chosen_save() {
        let older = stored("SYSTEM HANDOFF: older");
        let newer = stored("SYSTEM HANDOFF: newer");
        let older_id = older.id.clone();
        let saves = vec![newer, older];
        let transport = ScriptedTransport::new(move |_: &Request| Reply::success(&saves).unwrap());
        let orch = Orchestrator::new(transport, config());
        let page = HtmlPage::parse("https://chatgpt.com/", CHAT);
        let surface = RecordingSurface::new();

        orch.resume_with(&page, &surface, &older_id).await;
        let editor = page.query("#prompt-textarea").unwrap();
        assert_eq!(page.control_text(editor), "SYSTEM HANDOFF: older");

        let missing = orch.resume_with(&page, &surface, "nope").await;
        assert_eq!(missing, Outcome::Failed("No saved context found".to_string()));
    }

    #[tokio::test]
    async fn activation_happens_once_per_identity() {
        let transport = ScriptedTransport::new(|_: &Request| Reply::has_saved(false));
        let orch = Orchestrator::new(transport, config());
        let page = HtmlPage::parse("https://chatgpt.com/c/1", CHAT);
        let surface = RecordingSurface::new();

        let first = orch.activate(&page, &surface).await;
        assert_eq!(
            first,
            Activation::Attached {
                platform: Platform::ChatGpt,
                readiness: Readiness::Ready { attempts: 1 },
            }
        );
        assert_eq!(orch.activate(&page, &surface).await, Activation::AlreadyActive);
        assert_eq!(surface.attach_count(), 1);
        assert_eq!(surface.trigger_enabled(Trigger::Resume), Some(false));

        assert_eq!(orch.on_navigation(&page, &surface).await, None);
        let moved = HtmlPage::parse("https://chatgpt.com/c/2", CHAT);
        assert!(matches!(
            orch.on_navigation(&moved, &surface).await,
            Some(Activation::Attached { .. })
        ));
        assert_eq!(surface.attach_count(), 2);
        assert_eq!(orch.active_identity().as_deref(), Some("https://chatgpt.com/c/2"));
    }

    #[tokio::test]
    async fn watcher_reactivates_on_client_side_navigation() {
        let transport = ScriptedTransport::new(|_: &Request| Reply::has_saved(true));
        let orch = Orchestrator::new(transport, config());
        let page = HtmlPage::parse("https://chatgpt.com/c/1", CHAT);
        let surface = RecordingSurface::new();
        orch.activate(&page, &surface).await;

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let stop = async {
            let _ = stop_rx.await;
        };
        let route = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            page.navigate("https://chatgpt.com/c/2");
            tokio::time::sleep(Duration::from_millis(20)).await;
            page.navigate("https://example.com/");
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = stop_tx.send(());
        };
        let (attached, ()) = tokio::join!(
            orch.watch_navigation(&page, &surface, Duration::from_millis(2), stop),
            route
        );

        assert_eq!(attached, 1);
        assert_eq!(surface.attach_count(), 2);
        assert_eq!(orch.active_identity(), None);
    }

    #[tokio::test]
    async fn activation_gives_up_waiting_but_attaches() {
        let transport = ScriptedTransport::new(|_: &Request| Reply::has_saved(true));
        let orch = Orchestrator::new(transport, config());
        let page = HtmlPage::parse("https://claude.ai/new", "<html><body></body></html>");
        let surface = RecordingSurface::new();

        let activation = orch.activate(&page, &surface).await;
        assert_eq!(
            activation,
            Activation::Attached {
                platform: Platform::Claude,
                readiness: Readiness::GaveUp { attempts: 2 },
            }
        );
        assert!(surface.events().contains(&SurfaceEvent::Attached));
        assert_eq!(surface.trigger_enabled(Trigger::Resume), Some(true));
    }

    #[tokio::test]
    async fn unsupported_page_is_not_activated() {
        let transport = ScriptedTransport::new(|_: &Request| Reply::done());
        let orch = Orchestrator::new(transport, config());
        let page = HtmlPage::parse("https://example.com/", "<html><body></body></html>");
        let surface = RecordingSurface::new();

        assert_eq!(orch.activate(&page, &surface).await, Activation::Unsupported);
        assert!(surface.events().is_empty());
        assert_eq!(
            orch.save(&page, &surface).await,
            Outcome::Failed("This page is not a supported chat platform".to_string())
        );
    }
}
