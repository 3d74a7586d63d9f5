//! Transport selection between the realtime channel and polling.
//!
//! [`DeliveryMachine`] is a pure reducer: it owns no timers.  The runtime
//! feeds it channel statuses, watchdog expiry and poll ticks, and arms or
//! disarms its poll timer from the returned [`DeliveryAction`].
//!
//! Realtime is preferred.  Polling only runs while realtime is down, and
//! realtime becoming active cancels it, so `realtime_active && polling`
//! never holds.

use serde::Serialize;
use vibing_shared::backend::ChannelStatus;

/// Lifecycle of the realtime link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Connecting,
    Subscribed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryInput {
    /// Status reported by the channel.
    Status(ChannelStatus),
    /// The channel could not be set up at all.
    SubscribeFailed,
    /// No SUBSCRIBED within the subscribe timeout.
    WatchdogElapsed,
    PollTick,
    /// Session teardown.
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryAction {
    StartPolling,
    StopPolling,
    /// Fetch new messages now.
    Poll,
    Idle,
}

/// How new messages currently reach the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Connecting,
    Realtime,
    Polling,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryMachine {
    link: LinkState,
    realtime_active: bool,
    polling: bool,
}

impl DeliveryMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn is_realtime_active(&self) -> bool {
        self.realtime_active
    }

    pub fn is_polling(&self) -> bool {
        self.polling
    }

    pub fn mode(&self) -> DeliveryMode {
        if self.realtime_active {
            DeliveryMode::Realtime
        } else if self.polling {
            DeliveryMode::Polling
        } else {
            DeliveryMode::Connecting
        }
    }

    pub fn apply(&mut self, input: DeliveryInput) -> DeliveryAction {
        match input {
            DeliveryInput::Status(ChannelStatus::Subscribed) => {
                self.link = LinkState::Subscribed;
                self.realtime_active = true;
                self.stop_polling()
            }
            DeliveryInput::Status(_) | DeliveryInput::SubscribeFailed => {
                self.link = LinkState::Failed;
                self.realtime_active = false;
                self.start_polling()
            }
            DeliveryInput::WatchdogElapsed => self.start_polling(),
            DeliveryInput::PollTick => {
                if !self.polling {
                    DeliveryAction::Idle
                } else if self.realtime_active {
                    self.stop_polling()
                } else {
                    DeliveryAction::Poll
                }
            }
            DeliveryInput::Reset => {
                let action = self.stop_polling();
                *self = Self::default();
                action
            }
        }
    }

    /// No-op while already polling or while realtime is active.
    fn start_polling(&mut self) -> DeliveryAction {
        if self.polling || self.realtime_active {
            return DeliveryAction::Idle;
        }
        self.polling = true;
        DeliveryAction::StartPolling
    }

    fn stop_polling(&mut self) -> DeliveryAction {
        if !self.polling {
            return DeliveryAction::Idle;
        }
        self.polling = false;
        DeliveryAction::StopPolling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use DeliveryInput::*;

    #[test]
    fn subscribed_channel_never_polls() {
        let mut m = DeliveryMachine::new();
        assert_eq!(m.apply(Status(ChannelStatus::Subscribed)), DeliveryAction::Idle);
        assert_eq!(m.apply(WatchdogElapsed), DeliveryAction::Idle);
        assert_eq!(m.apply(PollTick), DeliveryAction::Idle);
        assert_eq!(m.mode(), DeliveryMode::Realtime);
        assert_eq!(m.link(), LinkState::Subscribed);
    }

    #[test]
    fn watchdog_starts_polling_once() {
        let mut m = DeliveryMachine::new();
        assert_eq!(m.apply(WatchdogElapsed), DeliveryAction::StartPolling);
        assert_eq!(m.link(), LinkState::Connecting);
        assert_eq!(m.apply(Status(ChannelStatus::TimedOut)), DeliveryAction::Idle);
        assert_eq!(m.apply(PollTick), DeliveryAction::Poll);
        assert_eq!(m.mode(), DeliveryMode::Polling);
    }

    #[test]
    fn failures_fall_back_and_recovery_stops_polling() {
        let mut m = DeliveryMachine::new();
        assert_eq!(m.apply(SubscribeFailed), DeliveryAction::StartPolling);
        assert_eq!(m.link(), LinkState::Failed);
        assert_eq!(m.apply(PollTick), DeliveryAction::Poll);

        assert_eq!(m.apply(Status(ChannelStatus::Subscribed)), DeliveryAction::StopPolling);
        assert!(!m.is_polling());
        assert_eq!(m.apply(PollTick), DeliveryAction::Idle);

        assert_eq!(m.apply(Status(ChannelStatus::Closed)), DeliveryAction::StartPolling);
        assert!(!m.is_realtime_active());
    }

    #[test]
    fn reset_stops_polling() {
        let mut m = DeliveryMachine::new();
        m.apply(Status(ChannelStatus::ChannelError));
        assert_eq!(m.apply(Reset), DeliveryAction::StopPolling);
        assert_eq!(m, DeliveryMachine::new());
        assert_eq!(m.apply(Reset), DeliveryAction::Idle);
    }

    fn any_input() -> impl Strategy<Value = DeliveryInput> {
        prop_oneof![
            Just(Status(ChannelStatus::Subscribed)),
            Just(Status(ChannelStatus::ChannelError)),
            Just(Status(ChannelStatus::TimedOut)),
            Just(Status(ChannelStatus::Closed)),
            Just(SubscribeFailed),
            Just(WatchdogElapsed),
            Just(PollTick),
            Just(Reset),
        ]
    }

    proptest! {
        #[test]
        fn never_realtime_and_polling_together(inputs in proptest::collection::vec(any_input(), 0..64)) {
            let mut m = DeliveryMachine::new();
            for input in inputs {
                m.apply(input);
                prop_assert!(!(m.is_realtime_active() && m.is_polling()));
            }
        }

        #[test]
        fn watchdog_without_subscription_means_polling(
            inputs in proptest::collection::vec(any_input(), 0..32)
        ) {
            let mut m = DeliveryMachine::new();
            for input in inputs
                .into_iter()
                .filter(|i| !matches!(i, Status(ChannelStatus::Subscribed) | Reset))
            {
                m.apply(input);
            }
            m.apply(WatchdogElapsed);
            prop_assert!(m.is_polling());
            prop_assert_eq!(m.apply(PollTick), DeliveryAction::Poll);
        }

        #[test]
        fn poll_only_fetches_while_realtime_is_down(inputs in proptest::collection::vec(any_input(), 0..64)) {
            let mut m = DeliveryMachine::new();
            for input in inputs {
                let realtime_before = m.is_realtime_active();
                if m.apply(input) == DeliveryAction::Poll {
                    prop_assert!(!realtime_before);
                    prop_assert!(m.is_polling());
                }
            }
        }
    }
}
