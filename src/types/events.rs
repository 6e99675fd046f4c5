use log::warn;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

pub use chatcore::types::events::*;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

// Macro to generate EventBus fields, constructor and the matching subscription set
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed push channels, one broadcast sender per event type.
        ///
        /// The external layer publishes; the engine holds a [`Subscriptions`]
        /// for as long as a session is open.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }

            /// Subscribe to every push channel at once.
            pub fn subscribe(&self) -> Subscriptions {
                Subscriptions {
                    $(
                        $field: Some(self.$field.subscribe()),
                    )*
                }
            }
        }

        /// Live receivers for every push channel.
        ///
        /// Dropping the value (or calling [`Subscriptions::unsubscribe`])
        /// releases all of them.
        #[derive(Debug)]
        pub struct Subscriptions {
            $(
                $field: Option<broadcast::Receiver<$type>>,
            )*
        }

        impl Subscriptions {
            pub fn unsubscribe(&mut self) {
                $(
                    self.$field = None;
                )*
            }

            pub fn is_active(&self) -> bool {
                false $(|| self.$field.is_some())*
            }
        }
    };
}

define_event_bus! {
    (new_messages, Arc<NewMessages>),
    (session_deltas, Arc<SessionDeltas>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Publish new messages for a session. Returns the number of live subscribers.
    pub fn publish_messages(&self, event: NewMessages) -> usize {
        self.new_messages.send(Arc::new(event)).unwrap_or(0)
    }

    /// Publish a session list tick. Returns the number of live subscribers.
    pub fn publish_sessions(&self, event: SessionDeltas) -> usize {
        self.session_deltas.send(Arc::new(event)).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.new_messages.receiver_count() + self.session_deltas.receiver_count()
    }
}

impl Subscriptions {
    /// Wait for the next push event on any channel.
    ///
    /// Returns `None` once every channel is closed or released.
    pub async fn recv(&mut self) -> Option<PushEvent> {
        loop {
            if !self.is_active() {
                return None;
            }
            tokio::select! {
                res = recv_from(&mut self.new_messages), if self.new_messages.is_some() => {
                    match res {
                        Ok(ev) => return Some(PushEvent::NewMessages(ev)),
                        Err(RecvError::Lagged(n)) => {
                            warn!("new_messages subscriber lagged, {} events skipped", n);
                        }
                        Err(RecvError::Closed) => self.new_messages = None,
                    }
                }
                res = recv_from(&mut self.session_deltas), if self.session_deltas.is_some() => {
                    match res {
                        Ok(ev) => return Some(PushEvent::SessionDeltas(ev)),
                        Err(RecvError::Lagged(n)) => {
                            warn!("session_deltas subscriber lagged, {} events skipped", n);
                        }
                        Err(RecvError::Closed) => self.session_deltas = None,
                    }
                }
            }
        }
    }
}

async fn recv_from<T: Clone>(rx: &mut Option<broadcast::Receiver<T>>) -> Result<T, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
