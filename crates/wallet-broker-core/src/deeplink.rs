//! Deeplink launching
//!
//! Handlers never talk to the platform directly. They launch URLs through a
//! [`DeeplinkLauncher`], which owns the foreground/background input and the
//! FIFO queue of launches issued while the host app was in the background.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;

/// Platform URL-opening collaborator
#[async_trait]
pub trait UrlOpener: Send + Sync {
    /// Whether some installed app handles this URL
    fn can_open(&self, url: &Url) -> bool;

    /// Open the URL, resolving with the platform's completion result
    async fn open(&self, url: &Url) -> bool;
}

/// Host application lifecycle input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppState {
    #[default]
    Foreground,
    Background,
}

impl AppState {
    pub fn is_background(&self) -> bool {
        matches!(self, AppState::Background)
    }
}

/// Opener answering `can_open` from a fixed set of schemes.
///
/// `open` succeeds exactly when `can_open` does. Used for tooling and for
/// hosts that launch URLs themselves.
#[derive(Debug, Clone, Default)]
pub struct StaticOpener {
    schemes: HashSet<String>,
    any: bool,
}

impl StaticOpener {
    /// Nothing is installed
    pub fn none() -> Self {
        Self::default()
    }

    /// Everything is installed
    pub fn any() -> Self {
        Self {
            schemes: HashSet::new(),
            any: true,
        }
    }

    pub fn schemes<I, S>(schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            schemes: schemes.into_iter().map(Into::into).collect(),
            any: false,
        }
    }
}

#[async_trait]
impl UrlOpener for StaticOpener {
    fn can_open(&self, url: &Url) -> bool {
        self.any || self.schemes.contains(url.scheme())
    }

    async fn open(&self, url: &Url) -> bool {
        self.can_open(url)
    }
}

// ============================================================================
// Launcher
// ============================================================================

struct QueuedLaunch {
    url: Url,
    done: oneshot::Sender<bool>,
}

#[derive(Default)]
struct LauncherState {
    app_state: AppState,
    queue: VecDeque<QueuedLaunch>,
    flushing: bool,
}

/// Launches deeplinks, deferring them while the host app is backgrounded
pub struct DeeplinkLauncher {
    opener: Arc<dyn UrlOpener>,
    state: Mutex<LauncherState>,
}

impl DeeplinkLauncher {
    pub fn new(opener: Arc<dyn UrlOpener>) -> Self {
        Self {
            opener,
            state: Mutex::new(LauncherState::default()),
        }
    }

    pub fn opener(&self) -> &Arc<dyn UrlOpener> {
        &self.opener
    }

    pub fn app_state(&self) -> AppState {
        self.state.lock().app_state
    }

    pub fn is_background(&self) -> bool {
        self.app_state().is_background()
    }

    /// Number of launches waiting for the next foreground transition
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Launch `url`, resolving with whether it was opened.
    ///
    /// While backgrounded the launch is queued and resolves once it has been
    /// replayed, or with `false` if the queue is cleared first.
    pub async fn launch(&self, url: Url) -> bool {
        let queued = {
            let mut state = self.state.lock();
            if state.app_state.is_background() || state.flushing {
                let (done, rx) = oneshot::channel();
                debug!(url = %url, position = state.queue.len(), "Queueing deeplink launch");
                state.queue.push_back(QueuedLaunch {
                    url: url.clone(),
                    done,
                });
                Some(rx)
            } else {
                None
            }
        };
        match queued {
            Some(rx) => rx.await.unwrap_or(false),
            None => self.open_now(&url).await,
        }
    }

    /// Feed an app lifecycle transition.
    ///
    /// On foreground, queued launches are replayed in issue order, one at a
    /// time: the next launch starts only after the previous open resolves,
    /// and replay stops if the app goes back to the background meanwhile.
    pub async fn set_app_state(&self, app_state: AppState) {
        {
            let mut state = self.state.lock();
            state.app_state = app_state;
            if app_state.is_background() || state.flushing {
                return;
            }
            state.flushing = true;
        }

        loop {
            let next = {
                let mut state = self.state.lock();
                let next = if state.app_state.is_background() {
                    None
                } else {
                    state.queue.pop_front()
                };
                if next.is_none() {
                    state.flushing = false;
                }
                next
            };
            let Some(QueuedLaunch { url, done }) = next else {
                break;
            };
            let opened = self.open_now(&url).await;
            let _ = done.send(opened);
        }
    }

    /// Drop every queued launch; their callers resolve with `false`
    pub fn clear(&self) {
        let dropped = std::mem::take(&mut self.state.lock().queue);
        if !dropped.is_empty() {
            info!(count = dropped.len(), "Discarding queued deeplink launches");
        }
    }

    async fn open_now(&self, url: &Url) -> bool {
        if !self.opener.can_open(url) {
            warn!(url = %url, "No installed app handles deeplink");
            return false;
        }
        info!(scheme = url.scheme(), "Opening deeplink");
        self.opener.open(url).await
    }
}

impl std::fmt::Debug for DeeplinkLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DeeplinkLauncher")
            .field("app_state", &state.app_state)
            .field("queued", &state.queue.len())
            .finish()
    }
}
