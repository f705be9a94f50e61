mod automation;
mod error;
mod metrics;
mod profile;
mod resolver;

pub use automation::{BrowserAutomation, BrowserLauncher, ChromiumCaptureSession};
pub use error::{BrowserError, BrowserResult};
pub use metrics::BrowserMetrics;
pub use profile::{BrowserProfile, ProfileManager};
pub use resolver::{
    AuthContext, CaptureSession, CaptureSessionFactory, ManifestDescriptor, ManifestPattern,
    ManifestResolver, ManifestSummary, ResolverSettings, SessionCookie,
};
