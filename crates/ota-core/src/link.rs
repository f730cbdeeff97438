//! Connectivity supervision.
//!
//! The agent does not own the network stack. It consumes connectivity events,
//! asks the [`Link`] to (re)connect, and subscribes the update topic through a
//! [`MessageChannel`] once an address is assigned.

use std::net::IpAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::events::{OtaEvent, OtaObserver};

/// Network link errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Subscribe to {topic:?} failed: {message}")]
    SubscribeFailed { topic: String, message: String },
}

/// Connectivity events delivered by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    StationStarted,
    Connected,
    Disconnected,
    GotAddress(IpAddr),
}

/// Station-mode link provider.
pub trait Link: Send + Sync {
    fn connect(&self) -> Result<(), LinkError>;
}

/// Publish/subscribe channel carrying update notifications.
pub trait MessageChannel: Send + Sync {
    fn subscribe(&self, topic: &str) -> Result<(), LinkError>;
}

/// Link state as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting,
    Online(IpAddr),
    GaveUp,
}

/// Drives reconnects and the update-topic subscription.
#[derive(Debug)]
pub struct LinkSupervisor {
    topic: String,
    max_attempts: u32,
    attempts: u32,
    status: LinkStatus,
    subscribed_for: Option<IpAddr>,
}

impl LinkSupervisor {
    pub fn new(topic: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            topic: topic.into(),
            max_attempts,
            attempts: 0,
            status: LinkStatus::Connecting,
            subscribed_for: None,
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Apply one connectivity event.
    pub fn handle<O: OtaObserver + ?Sized>(
        &mut self,
        event: ConnectivityEvent,
        link: &dyn Link,
        channel: &dyn MessageChannel,
        observer: &O,
    ) -> LinkStatus {
        match event {
            ConnectivityEvent::StationStarted => {
                self.status = LinkStatus::Connecting;
                self.connect(link);
            }
            ConnectivityEvent::Connected => {
                debug!("Link associated, waiting for address");
            }
            ConnectivityEvent::Disconnected => {
                self.subscribed_for = None;
                if self.attempts < self.max_attempts {
                    self.attempts += 1;
                    info!(
                        attempt = self.attempts,
                        max = self.max_attempts,
                        "Retry connecting to network..."
                    );
                    self.status = LinkStatus::Connecting;
                    self.connect(link);
                } else {
                    error!(attempts = self.attempts, "Failed to connect to network");
                    self.status = LinkStatus::GaveUp;
                }
            }
            ConnectivityEvent::GotAddress(ip) => {
                info!(ip = %ip, "Got address");
                self.attempts = 0;
                self.status = LinkStatus::Online(ip);
                if self.subscribed_for != Some(ip) {
                    match channel.subscribe(&self.topic) {
                        Ok(()) => {
                            self.subscribed_for = Some(ip);
                            observer.on_event(&OtaEvent::Subscribed {
                                topic: self.topic.clone(),
                            });
                        }
                        Err(e) => warn!(error = %e, "Subscribe failed"),
                    }
                }
            }
        }
        self.status
    }

    fn connect(&self, link: &dyn Link) {
        if let Err(e) = link.connect() {
            warn!(error = %e, "Connect request failed");
        }
    }
}

/// Always-up link for host runs. Counts connect requests.
#[derive(Debug, Default)]
pub struct LoopbackLink {
    connects: AtomicU32,
}

impl LoopbackLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Link for LoopbackLink {
    fn connect(&self) -> Result<(), LinkError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-process channel that records subscriptions.
#[derive(Debug, Default)]
pub struct LocalChannel {
    topics: Mutex<Vec<String>>,
}

impl LocalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Topics subscribed, in order, including repeats.
    pub fn subscriptions(&self) -> Vec<String> {
        self.topics.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions().iter().any(|t| t == topic)
    }
}

impl MessageChannel for LocalChannel {
    fn subscribe(&self, topic: &str) -> Result<(), LinkError> {
        let mut topics = self
            .topics
            .lock()
            .map_err(|_| LinkError::SubscribeFailed {
                topic: topic.to_string(),
                message: "channel poisoned".into(),
            })?;
        topics.push(topic.to_string());
        Ok(())
    }
}
