use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::CaptureSection;

use super::error::{BrowserError, BrowserResult};
use super::metrics::BrowserMetrics;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// Cookie jar of the browsing context that observed the manifest request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    cookies: Vec<SessionCookie>,
}

impl AuthContext {
    pub fn new(cookies: Vec<SessionCookie>) -> Self {
        Self { cookies }
    }

    pub fn cookies(&self) -> &[SessionCookie] {
        &self.cookies
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// `name=value; name=value`, or `None` for an empty jar.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|cookie| format!("{}={}", cookie.name, cookie.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Everything needed to replay the manifest request from another client.
///
/// Tokens embedded in the URL and cookies expire quickly, so the descriptor is neither
/// `Clone` nor cached: the fetcher consumes it.
pub struct ManifestDescriptor {
    pub manifest_url: String,
    pub referer: String,
    pub user_agent: String,
    pub auth: AuthContext,
    pub captured_at: DateTime<Utc>,
}

impl ManifestDescriptor {
    pub fn summary(&self) -> ManifestSummary {
        ManifestSummary {
            manifest_url: self.manifest_url.clone(),
            referer: self.referer.clone(),
            user_agent: self.user_agent.clone(),
            cookie_names: self
                .auth
                .cookies()
                .iter()
                .map(|cookie| cookie.name.clone())
                .collect(),
            captured_at: self.captured_at,
        }
    }
}

impl fmt::Debug for ManifestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManifestDescriptor")
            .field("manifest_url", &self.manifest_url)
            .field("referer", &self.referer)
            .field("user_agent", &self.user_agent)
            .field("cookies", &self.auth.cookies().len())
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

/// Cookie values redacted; safe to print.
#[derive(Debug, Clone, Serialize)]
pub struct ManifestSummary {
    pub manifest_url: String,
    pub referer: String,
    pub user_agent: String,
    pub cookie_names: Vec<String>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ManifestPattern {
    needles: Vec<String>,
}

impl ManifestPattern {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            needles: patterns
                .into_iter()
                .map(|pattern| pattern.as_ref().trim().to_lowercase())
                .filter(|pattern| !pattern.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        let url = url.to_lowercase();
        self.needles.iter().any(|needle| url.contains(needle))
    }
}

impl Default for ManifestPattern {
    fn default() -> Self {
        Self::new([".m3u8"])
    }
}

/// One isolated browsing context. Implementations must release every resource in `close`.
#[async_trait]
pub trait CaptureSession: Send {
    fn user_agent(&self) -> &str;
    /// Arms the network observer. The receiver resolves with the first matching URL.
    async fn watch_manifest(
        &mut self,
        pattern: ManifestPattern,
    ) -> BrowserResult<oneshot::Receiver<String>>;
    async fn navigate(&mut self, url: &str) -> BrowserResult<()>;
    async fn reload(&mut self) -> BrowserResult<()>;
    async fn trigger_playback(&mut self, selectors: &[String]) -> BrowserResult<()>;
    async fn cookies(&mut self) -> BrowserResult<Vec<SessionCookie>>;
    async fn close(self: Box<Self>) -> BrowserResult<()>;
}

#[async_trait]
pub trait CaptureSessionFactory: Send + Sync {
    async fn open(&self) -> BrowserResult<Box<dyn CaptureSession>>;
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub pattern: ManifestPattern,
    pub navigation_timeout: Duration,
    pub capture_timeout: Duration,
    pub reload_before_wait: bool,
    pub play_selectors: Vec<String>,
}

impl ResolverSettings {
    pub fn from_config(section: &CaptureSection) -> Self {
        Self {
            pattern: ManifestPattern::new(&section.manifest_patterns),
            navigation_timeout: Duration::from_secs(section.navigation_timeout_seconds),
            capture_timeout: Duration::from_secs(section.capture_timeout_seconds),
            reload_before_wait: section.reload_before_wait,
            play_selectors: section.play_selectors.clone(),
        }
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            pattern: ManifestPattern::default(),
            navigation_timeout: Duration::from_secs(20),
            capture_timeout: Duration::from_secs(20),
            reload_before_wait: false,
            play_selectors: Vec::new(),
        }
    }
}

/// Outcome of the navigation step. Only kept to explain a later timeout.
enum NavigationState {
    Loaded,
    StillLoading,
    Failed(String),
}

pub struct ManifestResolver {
    sessions: Arc<dyn CaptureSessionFactory>,
    settings: ResolverSettings,
    metrics: Arc<Mutex<BrowserMetrics>>,
}

impl ManifestResolver {
    pub fn new(sessions: Arc<dyn CaptureSessionFactory>, settings: ResolverSettings) -> Self {
        Self {
            sessions,
            settings,
            metrics: Arc::new(Mutex::new(BrowserMetrics::default())),
        }
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    pub fn metrics(&self) -> BrowserMetrics {
        self.with_metrics(|metrics| metrics.clone())
    }

    pub async fn resolve(&self, view_url: &str) -> BrowserResult<ManifestDescriptor> {
        let mut session = self.sessions.open().await?;
        self.with_metrics(BrowserMetrics::record_session_open);

        let outcome = match self.capture(session.as_mut(), view_url).await {
            Ok(manifest_url) => session
                .cookies()
                .await
                .map(|cookies| (manifest_url, cookies)),
            Err(err) => Err(err),
        };
        let user_agent = session.user_agent().to_string();
        if let Err(err) = session.close().await {
            warn!(url = %view_url, error = %err, "failed to tear down capture session");
        }

        let (manifest_url, cookies) = outcome?;
        info!(
            url = %view_url,
            manifest = %manifest_url,
            cookies = cookies.len(),
            "manifest resolved"
        );
        Ok(ManifestDescriptor {
            manifest_url,
            referer: view_url.to_string(),
            user_agent,
            auth: AuthContext::new(cookies),
            captured_at: Utc::now(),
        })
    }

    async fn capture(
        &self,
        session: &mut dyn CaptureSession,
        view_url: &str,
    ) -> BrowserResult<String> {
        // The observer must be armed before navigation or an early manifest request is lost.
        let mut manifest = session.watch_manifest(self.settings.pattern.clone()).await?;
        let deadline = Instant::now() + self.settings.capture_timeout;

        let navigation = {
            let navigate = timeout(self.settings.navigation_timeout, session.navigate(view_url));
            tokio::select! {
                biased;
                captured = &mut manifest => return self.captured(view_url, captured),
                _ = sleep_until(deadline) => {
                    return Err(self.timed_out(view_url, NavigationState::StillLoading));
                }
                result = navigate => match result {
                    Ok(Ok(())) => NavigationState::Loaded,
                    Ok(Err(err)) => {
                        self.with_metrics(BrowserMetrics::record_navigation_failure);
                        warn!(url = %view_url, error = %err, "navigation failed, still waiting for manifest");
                        NavigationState::Failed(err.to_string())
                    }
                    Err(_) => {
                        self.with_metrics(BrowserMetrics::record_navigation_failure);
                        debug!(url = %view_url, "navigation timed out, continuing with partial load");
                        NavigationState::StillLoading
                    }
                },
            }
        };

        if self.settings.reload_before_wait || !self.settings.play_selectors.is_empty() {
            let prepare = self.prepare_playback(session, view_url);
            tokio::select! {
                biased;
                captured = &mut manifest => return self.captured(view_url, captured),
                _ = sleep_until(deadline) => return Err(self.timed_out(view_url, navigation)),
                _ = prepare => {}
            }
        }

        match timeout_at(deadline, &mut manifest).await {
            Ok(captured) => self.captured(view_url, captured),
            Err(_) => Err(self.timed_out(view_url, navigation)),
        }
    }

    async fn prepare_playback(&self, session: &mut dyn CaptureSession, view_url: &str) {
        if self.settings.reload_before_wait {
            if let Err(err) = session.reload().await {
                warn!(url = %view_url, error = %err, "reload before capture failed");
            }
        }
        if !self.settings.play_selectors.is_empty() {
            match session.trigger_playback(&self.settings.play_selectors).await {
                Ok(()) => self.with_metrics(BrowserMetrics::record_playback_trigger),
                Err(err) => warn!(url = %view_url, error = %err, "playback trigger failed"),
            }
        }
    }

    fn captured(
        &self,
        view_url: &str,
        captured: Result<String, oneshot::error::RecvError>,
    ) -> BrowserResult<String> {
        match captured {
            Ok(manifest_url) => {
                self.with_metrics(BrowserMetrics::record_manifest);
                debug!(url = %view_url, manifest = %manifest_url, "manifest request captured");
                Ok(manifest_url)
            }
            Err(_) => Err(BrowserError::ObserverClosed),
        }
    }

    fn timed_out(&self, view_url: &str, navigation: NavigationState) -> BrowserError {
        self.with_metrics(BrowserMetrics::record_timeout);
        match navigation {
            NavigationState::Failed(reason) => BrowserError::Navigation {
                url: view_url.to_string(),
                reason,
            },
            NavigationState::Loaded | NavigationState::StillLoading => {
                warn!(url = %view_url, timeout = ?self.settings.capture_timeout, "no manifest observed");
                BrowserError::ResolutionTimeout(self.settings.capture_timeout)
            }
        }
    }

    fn with_metrics<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut BrowserMetrics) -> R,
    {
        let mut guard = self
            .metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}
