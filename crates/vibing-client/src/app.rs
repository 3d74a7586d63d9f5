//! Top-level wiring: preferences, in-app navigation, board actions and the
//! message session, which lives exactly as long as the Messages tab is shown.

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use vibing_shared::UserId;
use vibing_store::Preferences;

use crate::community::CommunityService;
use crate::error::NavigationError;
use crate::events::{EventSink, MessageEvent};
use crate::navigation::{BackOutcome, Navigator, Tab};
use crate::runtime::{spawn_session_with, DeliveryTimings, SessionHandle};
use crate::session::SessionDeps;

const EVENT_CAPACITY: usize = 512;

pub struct App {
    prefs: Preferences,
    navigator: Navigator,
    deps: SessionDeps,
    community: CommunityService,
    timings: DeliveryTimings,
    /// Running message session, present only on the Messages tab.
    messages: Option<SessionHandle>,
    events: EventSink,
    events_rx: Option<mpsc::Receiver<MessageEvent>>,
}

impl App {
    pub fn new(
        deps: SessionDeps,
        community: CommunityService,
        prefs: Preferences,
        timings: DeliveryTimings,
    ) -> Self {
        let (events, events_rx) = EventSink::channel(EVENT_CAPACITY);
        Self {
            prefs,
            navigator: Navigator::new(),
            deps,
            community,
            timings,
            messages: None,
            events,
            events_rx: Some(events_rx),
        }
    }

    /// The view-model stream of every session this app spawns.  Can be
    /// taken once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<MessageEvent>> {
        self.events_rx.take()
    }

    pub fn active_tab(&self) -> Tab {
        self.navigator.active_tab()
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub fn navigator_mut(&mut self) -> &mut Navigator {
        &mut self.navigator
    }

    pub fn preferences(&self) -> &Preferences {
        &self.prefs
    }

    /// Likes, follows, saves, comments and tags.  Independent of the tab.
    pub fn community(&self) -> &CommunityService {
        &self.community
    }

    /// Handle of the running message session.
    pub fn messages(&self) -> Option<&SessionHandle> {
        self.messages.as_ref()
    }

    /// Show `tab`, recording the scroll position of the tab being left.
    pub async fn switch_tab(&mut self, tab: Tab, scroll: u32) -> Result<(), NavigationError> {
        if tab.requires_login() && self.deps.auth.current_user().await.is_none() {
            info!(%tab, "Tab needs a signed-in user");
            self.events.emit(MessageEvent::Alert {
                message: "Please log in to continue".into(),
            });
            return Err(NavigationError::LoginRequired(tab.to_string()));
        }

        self.navigator.push_tab(tab, scroll);
        if tab == Tab::Messages {
            if let Some(handle) = self.live_session() {
                if let Err(e) = handle.reload().await {
                    warn!(error = %e, "Failed to reload messages");
                }
                return Ok(());
            }
        }
        self.enter(tab).await;
        Ok(())
    }

    /// Browser-style back.  Leaving the Messages tab tears its session down.
    pub async fn back(&mut self) -> BackOutcome {
        let outcome = self.navigator.back();
        if let BackOutcome::Restore { entry, .. } = &outcome {
            debug!(fragment = %entry.fragment(), "History restored");
            let tab = self.navigator.active_tab();
            self.enter(tab).await;
        }
        outcome
    }

    /// Jump to the Messages tab and open a conversation with `user`.
    pub async fn message_user(
        &mut self,
        user: UserId,
        nickname: &str,
    ) -> Result<(), NavigationError> {
        self.switch_tab(Tab::Messages, 0).await?;
        if let Some(handle) = self.live_session() {
            if let Err(e) = handle.open_with(user, nickname).await {
                warn!(error = %e, "Failed to open conversation");
            }
        }
        if let Err(e) = self
            .prefs
            .add_recent_search(user, nickname, Utc::now().timestamp_millis())
        {
            warn!(error = %e, "Failed to record recent search");
        }
        Ok(())
    }

    /// Dispose the message session, if any.
    pub async fn shutdown(&mut self) {
        self.leave_messages().await;
    }

    async fn enter(&mut self, tab: Tab) {
        if tab != Tab::Messages {
            self.leave_messages().await;
            return;
        }
        if self.live_session().is_none() {
            debug!("Starting message session");
            self.messages = Some(spawn_session_with(
                self.deps.clone(),
                self.timings,
                self.events.clone(),
            ));
        }
    }

    fn live_session(&self) -> Option<&SessionHandle> {
        self.messages.as_ref().filter(|h| !h.is_closed())
    }

    async fn leave_messages(&mut self) {
        let Some(handle) = self.messages.take() else {
            return;
        };
        if handle.shutdown().await.is_ok() {
            handle.closed().await;
        }
        debug!("Message session stopped");
    }
}
