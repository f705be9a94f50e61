use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventRequestWillBeSent, EventResponseReceived, GetAllCookiesParams,
};
use chromiumoxide::cdp::browser_protocol::page::{NavigateParams, ReloadParams};
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use rand::seq::SliceRandom;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ChromiumSection, HlsgrabConfig};

use super::error::{BrowserError, BrowserResult};
use super::profile::{BrowserProfile, ProfileManager};
use super::resolver::{CaptureSession, CaptureSessionFactory, ManifestPattern, SessionCookie};

const FALLBACK_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36";

const PLAY_SCRIPT: &str = r#"
(() => {
    for (const video of document.querySelectorAll('video')) {
        video.muted = true;
        const attempt = video.play();
        if (attempt && attempt.catch) { attempt.catch(() => {}); }
    }
})();
"#;

/// Launches one Chromium process per capture session, each on a fresh profile.
#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    config: Arc<HlsgrabConfig>,
    profiles: ProfileManager,
}

impl BrowserLauncher {
    pub fn new(config: Arc<HlsgrabConfig>, profiles: ProfileManager) -> Self {
        Self { config, profiles }
    }

    pub fn from_config(config: Arc<HlsgrabConfig>) -> BrowserResult<Self> {
        let profiles = ProfileManager::from_config(&config)?;
        Ok(Self::new(config, profiles))
    }

    pub async fn launch(&self) -> BrowserResult<BrowserAutomation> {
        self.profiles.cleanup_expired()?;
        let profile = self.profiles.allocate()?;
        let user_agent = self.select_user_agent();
        let chromium_config = match self.build_chromium_config(&profile, &user_agent) {
            Ok(config) => config,
            Err(err) => {
                profile.release();
                return Err(err);
            }
        };
        info!(
            profile = %profile.id(),
            ua = %user_agent,
            headless = self.config.chromium.headless,
            "launching chromium"
        );

        let (browser, mut handler) = match Browser::launch(chromium_config).await {
            Ok(launched) => launched,
            Err(err) => {
                profile.release();
                return Err(BrowserError::Launch(err.to_string()));
            }
        };

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        Ok(BrowserAutomation {
            browser,
            profile: Some(profile),
            handler_task: Some(handler_task),
            user_agent,
        })
    }

    fn select_user_agent(&self) -> String {
        let mut rng = rand::thread_rng();
        self.config
            .user_agents
            .pool
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| FALLBACK_USER_AGENT.to_string())
    }

    fn build_chromium_config(
        &self,
        profile: &BrowserProfile,
        user_agent: &str,
    ) -> BrowserResult<ChromiumConfig> {
        let chromium = &self.config.chromium;
        let mut builder = ChromiumConfig::builder().user_data_dir(profile.path());

        if let Some(executable) = &chromium.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if !chromium.headless {
            builder = builder.with_head();
        }
        if !chromium.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = chromium.request_timeout_seconds {
            builder = builder.request_timeout(std::time::Duration::from_secs(timeout));
        }

        let args = chromium_args(chromium, user_agent);
        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

#[async_trait]
impl CaptureSessionFactory for BrowserLauncher {
    async fn open(&self) -> BrowserResult<Box<dyn CaptureSession>> {
        let automation = self.launch().await?;
        match automation.new_page().await {
            Ok(page) => Ok(Box::new(ChromiumCaptureSession {
                user_agent: automation.user_agent().to_string(),
                automation: Some(automation),
                page: Some(page),
                observer: None,
            })),
            Err(err) => {
                if let Err(shutdown) = automation.shutdown().await {
                    warn!(error = %shutdown, "failed to shut down chromium after page error");
                }
                Err(err)
            }
        }
    }
}

#[derive(Debug)]
pub struct BrowserAutomation {
    browser: Browser,
    profile: Option<BrowserProfile>,
    handler_task: Option<JoinHandle<()>>,
    user_agent: String,
}

impl BrowserAutomation {
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub async fn new_page(&self) -> BrowserResult<Page> {
        let page = self
            .browser
            .new_page(CreateTargetParams::new("about:blank"))
            .await?;
        page.enable_stealth_mode_with_agent(&self.user_agent).await?;
        Ok(page)
    }

    pub async fn shutdown(mut self) -> BrowserResult<()> {
        let profile_id = self
            .profile
            .as_ref()
            .map(|profile| profile.id().to_string())
            .unwrap_or_default();
        info!(profile = %profile_id, "shutting down chromium");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }
        if let Some(profile) = self.profile.take() {
            profile.release();
        }
        Ok(())
    }
}

impl Drop for BrowserAutomation {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!(
                    profile = ?self.profile.as_ref().map(BrowserProfile::id),
                    "BrowserAutomation dropped without explicit shutdown"
                );
            }
        }
    }
}

pub struct ChromiumCaptureSession {
    automation: Option<BrowserAutomation>,
    page: Option<Page>,
    observer: Option<JoinHandle<()>>,
    user_agent: String,
}

impl ChromiumCaptureSession {
    fn page(&self) -> BrowserResult<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| BrowserError::Unexpected("capture page already closed".into()))
    }
}

#[async_trait]
impl CaptureSession for ChromiumCaptureSession {
    fn user_agent(&self) -> &str {
        &self.user_agent
    }

    async fn watch_manifest(
        &mut self,
        pattern: ManifestPattern,
    ) -> BrowserResult<oneshot::Receiver<String>> {
        let page = self.page()?;
        page.execute(EnableParams::default()).await?;
        let requests = page
            .event_listener::<EventRequestWillBeSent>()
            .await?
            .map(|event| event.request.url.clone());
        let responses = page
            .event_listener::<EventResponseReceived>()
            .await?
            .map(|event| event.response.url.clone());

        let (tx, rx) = oneshot::channel();
        let observer = tokio::spawn(async move {
            let mut urls = Box::pin(futures::stream::select(requests, responses));
            let mut observed = 0u64;
            while let Some(url) = urls.next().await {
                observed += 1;
                if pattern.matches(&url) {
                    debug!(url = %url, observed, "manifest request on the wire");
                    let _ = tx.send(url);
                    return;
                }
            }
            debug!(observed, "network event stream ended without a manifest");
        });
        if let Some(previous) = self.observer.replace(observer) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page()?
            .goto(params)
            .await
            .map_err(|err| BrowserError::Navigation {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        Ok(())
    }

    async fn reload(&mut self) -> BrowserResult<()> {
        self.page()?.execute(ReloadParams::default()).await?;
        Ok(())
    }

    async fn trigger_playback(&mut self, selectors: &[String]) -> BrowserResult<()> {
        let page = self.page()?;
        for selector in selectors {
            if let Ok(element) = page.find_element(selector.as_str()).await {
                match element.click().await {
                    Ok(_) => {
                        debug!(selector = %selector, "clicked play control");
                        break;
                    }
                    Err(err) => debug!(selector = %selector, error = %err, "play control click failed"),
                }
            }
        }
        page.evaluate(PLAY_SCRIPT).await?;
        Ok(())
    }

    async fn cookies(&mut self) -> BrowserResult<Vec<SessionCookie>> {
        let response = self.page()?.execute(GetAllCookiesParams::default()).await?;
        Ok(response
            .result
            .cookies
            .into_iter()
            .map(|cookie| SessionCookie {
                name: cookie.name,
                value: cookie.value,
                domain: cookie.domain,
                path: cookie.path,
            })
            .collect())
    }

    async fn close(mut self: Box<Self>) -> BrowserResult<()> {
        if let Some(observer) = self.observer.take() {
            observer.abort();
        }
        if let Some(page) = self.page.take() {
            if let Err(err) = page.close().await {
                debug!(error = %err, "page close failed, browser shutdown will reap it");
            }
        }
        match self.automation.take() {
            Some(automation) => automation.shutdown().await,
            None => Ok(()),
        }
    }
}

/// Command-line switches for one capture browser. Site isolation is disabled so
/// cross-origin player iframes stay in the page target and their network events reach
/// the page's listeners.
fn chromium_args(chromium: &ChromiumSection, user_agent: &str) -> Vec<String> {
    let mut args = vec![
        format!("--user-agent={user_agent}"),
        "--autoplay-policy=no-user-gesture-required".to_string(),
        "--disable-features=AutomationControlled,IsolateOrigins,site-per-process".to_string(),
        "--disable-site-isolation-trials".to_string(),
        "--no-first-run".to_string(),
        "--password-store=basic".to_string(),
    ];
    if chromium.disable_gpu {
        args.push("--disable-gpu".into());
    }
    if chromium.mute_audio {
        args.push("--mute-audio".into());
    }
    args
}
