//! Request router of the background service. Owns the store; every request is
//! answered with exactly one [`Reply`].

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::models::{CaptureRequest, Request};
use crate::api::response::Reply;
use crate::error::{AppError, Result};
use crate::llm::SummaryProvider;
use crate::store::{Settings, Store, Summary};

pub struct Dispatcher<P> {
    store: Arc<Store>,
    provider: P,
}

impl<P: SummaryProvider> Dispatcher<P> {
    pub fn new(store: Arc<Store>, provider: P) -> Self {
        Self { store, provider }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Handles an undecoded message; unknown actions get an explicit failure.
    pub async fn handle_value(&self, value: Value) -> Reply {
        match Request::from_value(value) {
            Ok(request) => self.handle(request).await,
            Err(err) => {
                warn!(error = %err, "rejected message");
                err.into()
            }
        }
    }

    pub async fn handle(&self, request: Request) -> Reply {
        let action = request.action();
        debug!(action, "handling request");
        match self.route(request).await {
            Ok(reply) => reply,
            Err(err) => {
                if err.is_no_op() {
                    debug!(action, reason = %err, "nothing to do");
                } else {
                    warn!(action, error = %err, "request failed");
                }
                err.into()
            }
        }
    }

    async fn route(&self, request: Request) -> Result<Reply> {
        match request {
            Request::Summarize(capture) => {
                let summary = self.summarize(capture).await?;
                Reply::success(summary)
            }
            Request::GetLastSave => {
                let last = self.store.last().await.ok_or(AppError::NothingSaved)?;
                Reply::success(last)
            }
            Request::GetAllSaves => Reply::success(self.store.saves().await),
            Request::HasSavedState => Ok(Reply::has_saved(self.store.last().await.is_some())),
            Request::DeleteSave { id } => {
                self.store.delete(&id).await?;
                Ok(Reply::done())
            }
            Request::GetSettings => Reply::success(self.store.settings().await),
            Request::SaveSettings { settings } => {
                self.save_settings(settings).await?;
                Ok(Reply::done())
            }
        }
    }

    /// Calls the configured provider and stores the handoff it returns.
    pub async fn summarize(&self, capture: CaptureRequest) -> Result<Summary> {
        if capture.conversation_text.trim().is_empty() {
            return Err(AppError::NothingToCapture);
        }

        let settings = self.store.settings().await;
        if settings.api_key.trim().is_empty() {
            return Err(AppError::MissingApiKey);
        }

        let handoff = self
            .provider
            .summarize(&settings, &capture.conversation_text)
            .await?;

        let summary = Summary::new(
            handoff,
            &capture.platform_name,
            &capture.source_url,
            capture.captured_at,
        );
        self.store
            .insert(summary.clone())
            .await
            .map_err(|err| match err {
                AppError::Storage(detail) => AppError::SummaryNotStored(detail),
                other => other,
            })?;
        info!(id = %summary.id, platform = %summary.platform, "saved handoff");
        Ok(summary)
    }

    async fn save_settings(&self, settings: Settings) -> Result<()> {
        self.store.save_settings(settings).await?;
        info!("settings saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ApiProvider;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CannedProvider {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CannedProvider {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
            }
        }
    }

    impl SummaryProvider for CannedProvider {
        async fn summarize(&self, _settings: &Settings, transcript: &str) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(format!("SYSTEM HANDOFF: call {n} over {} chars", transcript.len()))
        }
    }

    struct FailingProvider;

    impl SummaryProvider for FailingProvider {
        async fn summarize(&self, _settings: &Settings, _transcript: &str) -> Result<String> {
            Err(AppError::Provider("Rate limit reached".to_string()))
        }
    }

    async fn configured_store() -> Arc<Store> {
        let store = Arc::new(Store::in_memory());
        store
            .save_settings(Settings {
                api_provider: ApiProvider::OpenAi,
                api_key: "sk-test".to_string(),
            })
            .await
            .unwrap();
        store
    }

    fn capture(text: &str) -> CaptureRequest {
        CaptureRequest {
            conversation_text: text.to_string(),
            platform_name: "ChatGPT".to_string(),
            source_url: "https://chatgpt.com/c/1".to_string(),
            captured_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn missing_key_is_a_credential_error() {
        let dispatcher = Dispatcher::new(Arc::new(Store::in_memory()), CannedProvider::new(Duration::ZERO));
        let reply = dispatcher.handle(Request::Summarize(capture("User: hi"))).await;
        assert!(!reply.success);
        assert!(reply.error.unwrap().contains("No API key configured"));
        assert_eq!(dispatcher.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_summaries_are_both_kept() {
        let store = configured_store().await;
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            CannedProvider::new(Duration::from_millis(20)),
        ));

        let a = tokio::spawn({
            let d = dispatcher.clone();
            async move { d.summarize(capture("User: one")).await }
        });
        let b = tokio::spawn({
            let d = dispatcher.clone();
            async move { d.summarize(capture("User: two")).await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(store.saves().await.len(), 2);
    }

    #[tokio::test]
    async fn provider_error_is_passed_through() {
        let dispatcher = Dispatcher::new(configured_store().await, FailingProvider);
        let reply = dispatcher.handle(Request::Summarize(capture("User: hi"))).await;
        assert_eq!(reply, Reply::failure("Rate limit reached"));
        assert!(dispatcher.store().saves().await.is_empty());
    }

    #[tokio::test]
    async fn last_save_absent_is_failure_but_has_saved_is_false() {
        let dispatcher = Dispatcher::new(Arc::new(Store::in_memory()), FailingProvider);
        let last = dispatcher.handle(Request::GetLastSave).await;
        assert_eq!(last, Reply::failure("No saved context found"));
        let has = dispatcher.handle(Request::HasSavedState).await;
        assert_eq!(has, Reply::has_saved(false));
    }

    #[tokio::test]
    async fn delete_of_missing_id_succeeds() {
        let dispatcher = Dispatcher::new(configured_store().await, CannedProvider::new(Duration::ZERO));
        dispatcher.summarize(capture("User: hi")).await.unwrap();
        let reply = dispatcher
            .handle(Request::DeleteSave { id: "gone".to_string() })
            .await;
        assert!(reply.success);
        assert_eq!(dispatcher.store().saves().await.len(), 1);
    }

    #[tokio::test]
    async fn settings_are_replaced_wholesale() {
        let dispatcher = Dispatcher::new(configured_store().await, FailingProvider);
        let reply = dispatcher
            .handle_value(json!({
                "action": "saveSettings",
                "settings": { "apiProvider": "gemini", "apiKey": "" }
            }))
            .await;
        assert!(reply.success);

        let settings: Settings = dispatcher.handle(Request::GetSettings).await.into_data().unwrap();
        assert_eq!(settings.api_provider, ApiProvider::Gemini);
        assert_eq!(settings.api_key, "");
    }

    async fn unwritable_store(dir: &std::path::Path) -> Arc<Store> {
        let path = dir.join("store.json");
        let store = Store::open(&path).await.unwrap();
        store
            .save_settings(Settings {
                api_provider: ApiProvider::OpenAi,
                api_key: "sk-test".to_string(),
            })
            .await
            .unwrap();
        std::fs::create_dir(path.with_extension("json.tmp")).unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn failed_settings_write_does_not_mention_a_summary() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Dispatcher::new(unwritable_store(dir.path()).await, FailingProvider);
        let reply = dispatcher
            .handle(Request::SaveSettings {
                settings: Settings::default(),
            })
            .await;
        assert!(!reply.success);
        let error = reply.error.unwrap();
        assert!(error.starts_with("Storage error: "), "{error}");
        assert!(!error.contains("Summary generated"));
    }

    #[tokio::test]
    async fn failed_summary_write_says_the_summary_was_generated() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Dispatcher::new(unwritable_store(dir.path()).await, CannedProvider::new(Duration::ZERO));
        let reply = dispatcher.handle(Request::Summarize(capture("User: hi"))).await;
        assert!(!reply.success);
        assert!(reply.error.unwrap().starts_with("Summary generated but storage failed: "));
        assert_eq!(dispatcher.provider.calls.load(Ordering::SeqCst), 1);
        assert!(dispatcher.store().saves().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_action_gets_explicit_failure() {
        let dispatcher = Dispatcher::new(Arc::new(Store::in_memory()), FailingProvider);
        let reply = dispatcher.handle_value(json!({ "action": "explode" })).await;
        assert_eq!(reply, Reply::failure("Unknown action: explode"));
    }
}
