use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowserMetrics {
    pub sessions_opened: u64,
    pub manifests_captured: u64,
    pub resolution_timeouts: u64,
    pub navigation_failures: u64,
    pub playback_triggers: u64,
}

impl BrowserMetrics {
    pub fn record_session_open(&mut self) {
        self.sessions_opened = self.sessions_opened.saturating_add(1);
    }

    pub fn record_manifest(&mut self) {
        self.manifests_captured = self.manifests_captured.saturating_add(1);
    }

    pub fn record_timeout(&mut self) {
        self.resolution_timeouts = self.resolution_timeouts.saturating_add(1);
    }

    pub fn record_navigation_failure(&mut self) {
        self.navigation_failures = self.navigation_failures.saturating_add(1);
    }

    pub fn record_playback_trigger(&mut self) {
        self.playback_triggers = self.playback_triggers.saturating_add(1);
    }

    pub fn capture_rate(&self) -> f64 {
        if self.sessions_opened == 0 {
            0.0
        } else {
            (self.manifests_captured as f64 / self.sessions_opened as f64) * 100.0
        }
    }
}
