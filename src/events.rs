//! Application events published on a broadcast channel.
//!
//! The middleware pipeline emits events rather than calling subscribers
//! directly: the rate limiter announces limit breaches (debounced), and the
//! terminating reporter announces every observed response. Subscribers attach
//! via [`EventBus::subscribe`]; the default subscriber installed at startup
//! just logs. Publishing is fire-and-forget — a send with no live subscribers
//! is not an error.

use tokio::sync::broadcast;

/// Payload shared by both limit-breach events.
#[derive(Debug, Clone)]
pub struct LimitBreach {
    pub ip: String,
    pub max_events: u64,
    /// Attempts recorded in the window at the time of the breach.
    pub attempts: u64,
    pub decay_seconds: u64,
    /// Seconds until the window decays and the client is admitted again.
    pub available_in: u64,
    pub return_code: u16,
    pub return_message: String,
}

/// Events observable by external subscribers (audit, metrics, alerting).
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// The request-rate limit was breached. Emitted at most once per
    /// suppression window per IP.
    MaxRequestsLimit(LimitBreach),
    /// The error-rate limit was breached. Same debounce contract.
    MaxRequestErrorsLimit(LimitBreach),
    /// A response left the pipeline. Emitted for every terminated request.
    ResponseObserved {
        method: String,
        uri: String,
        status: u16,
        /// Classified response type: `json`, `html`, or `unknown`.
        response_type: &'static str,
        content_type: Option<String>,
        /// Body size in bytes when the response declares one.
        size: Option<u64>,
    },
}

/// Broadcast fan-out for [`AppEvent`]s.
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        // Slow subscribers lag rather than block publishers.
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Publish an event. Fire-and-forget: the absence of subscribers is fine.
    pub fn publish(&self, event: AppEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }
}

/// Default subscriber: logs every event. Spawned once at startup.
pub async fn log_events(mut rx: broadcast::Receiver<AppEvent>) {
    loop {
        match rx.recv().await {
            Ok(AppEvent::MaxRequestsLimit(breach)) => {
                tracing::warn!(
                    ip = %breach.ip,
                    attempts = breach.attempts,
                    max_events = breach.max_events,
                    available_in = breach.available_in,
                    "request rate limit breached"
                );
            }
            Ok(AppEvent::MaxRequestErrorsLimit(breach)) => {
                tracing::warn!(
                    ip = %breach.ip,
                    attempts = breach.attempts,
                    max_events = breach.max_events,
                    available_in = breach.available_in,
                    "error rate limit breached"
                );
            }
            Ok(AppEvent::ResponseObserved {
                method,
                uri,
                status,
                response_type,
                ..
            }) => {
                tracing::debug!(%method, %uri, status, response_type, "response observed");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breach() -> LimitBreach {
        LimitBreach {
            ip: "1.2.3.4".into(),
            max_events: 60,
            attempts: 61,
            decay_seconds: 60,
            available_in: 42,
            return_code: 404,
            return_message: String::new(),
        }
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(AppEvent::MaxRequestsLimit(breach()));

        match rx.recv().await.unwrap() {
            AppEvent::MaxRequestsLimit(b) => {
                assert_eq!(b.ip, "1.2.3.4");
                assert_eq!(b.attempts, 61);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(AppEvent::MaxRequestErrorsLimit(breach()));
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(AppEvent::ResponseObserved {
            method: "GET".into(),
            uri: "/profile".into(),
            status: 200,
            response_type: "json",
            content_type: Some("application/json".into()),
            size: Some(17),
        });

        assert!(matches!(a.recv().await.unwrap(), AppEvent::ResponseObserved { .. }));
        assert!(matches!(b.recv().await.unwrap(), AppEvent::ResponseObserved { .. }));
    }
}
