//! Gateway metrics for observability
//!
//! Provides runtime metrics for monitoring gateway health and traffic.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Gateway-wide metrics
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    // Session metrics
    /// Currently active client sessions
    pub active_sessions: AtomicU64,
    /// Total sessions since gateway start
    pub total_sessions: AtomicU64,

    // Traffic metrics
    /// Correlated requests received from clients
    pub requests_received: AtomicU64,
    /// Response frames sent to clients
    pub responses_sent: AtomicU64,
    /// Event frames sent to clients
    pub events_sent: AtomicU64,
    /// Event frames dropped due to backpressure or lag
    pub events_dropped: AtomicU64,
    /// Step ticks dropped because a client channel was full
    pub steps_dropped: AtomicU64,

    // Bus metrics
    /// Messages republished onto the internal bus
    pub bus_published: AtomicU64,
    /// Bus messages forwarded to clients
    pub bus_forwarded: AtomicU64,

    // Backend metrics
    /// Backend calls that timed out
    pub backend_timeouts: AtomicU64,
    /// Backend link reconnects after a drop
    pub backend_reconnects: AtomicU64,

    // Error metrics
    /// Credential checks that failed
    pub auth_failures: AtomicU64,
    /// Undecodable client frames
    pub malformed_messages: AtomicU64,
    /// WebSocket errors
    pub websocket_errors: AtomicU64,

    /// Gateway start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    // Session tracking
    pub fn session_opened(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    // Traffic tracking
    pub fn request_received(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_sent(&self) {
        self.responses_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_sent(&self) {
        self.events_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_dropped_by(&self, count: u64) {
        self.events_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn step_dropped(&self) {
        self.steps_dropped.fetch_add(1, Ordering::Relaxed);
    }

    // Bus tracking
    pub fn bus_message_published(&self) {
        self.bus_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bus_message_forwarded(&self) {
        self.bus_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    // Backend tracking
    pub fn backend_timeout(&self) {
        self.backend_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn backend_reconnect(&self) {
        self.backend_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    // Error tracking
    pub fn auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_message(&self) {
        self.malformed_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn websocket_error(&self) {
        self.websocket_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            sessions: SessionMetrics {
                active: self.active_sessions.load(Ordering::Relaxed),
                total: self.total_sessions.load(Ordering::Relaxed),
            },
            traffic: TrafficMetrics {
                requests_received: self.requests_received.load(Ordering::Relaxed),
                responses_sent: self.responses_sent.load(Ordering::Relaxed),
                events_sent: self.events_sent.load(Ordering::Relaxed),
                events_dropped: self.events_dropped.load(Ordering::Relaxed),
                steps_dropped: self.steps_dropped.load(Ordering::Relaxed),
            },
            bus: BusMetrics {
                published: self.bus_published.load(Ordering::Relaxed),
                forwarded: self.bus_forwarded.load(Ordering::Relaxed),
            },
            backends: BackendMetrics {
                timeouts: self.backend_timeouts.load(Ordering::Relaxed),
                reconnects: self.backend_reconnects.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                auth_failures: self.auth_failures.load(Ordering::Relaxed),
                malformed_messages: self.malformed_messages.load(Ordering::Relaxed),
                websocket: self.websocket_errors.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub sessions: SessionMetrics,
    pub traffic: TrafficMetrics,
    pub bus: BusMetrics,
    pub backends: BackendMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficMetrics {
    pub requests_received: u64,
    pub responses_sent: u64,
    pub events_sent: u64,
    pub events_dropped: u64,
    pub steps_dropped: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMetrics {
    pub published: u64,
    pub forwarded: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendMetrics {
    pub timeouts: u64,
    pub reconnects: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub auth_failures: u64,
    pub malformed_messages: u64,
    pub websocket: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub sessions: SessionMetrics,
    pub uptime_secs: u64,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_tracking() {
        let metrics = GatewayMetrics::new();

        metrics.session_opened();
        metrics.session_opened();
        assert_eq!(metrics.active_sessions.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.total_sessions.load(Ordering::Relaxed), 2);

        metrics.session_closed();
        assert_eq!(metrics.active_sessions.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.total_sessions.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_traffic_tracking() {
        let metrics = GatewayMetrics::new();

        metrics.request_received();
        metrics.response_sent();
        metrics.event_sent();
        metrics.events_dropped_by(3);
        metrics.step_dropped();

        assert_eq!(metrics.requests_received.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.events_dropped.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.steps_dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_snapshot() {
        let metrics = GatewayMetrics::new();
        metrics.session_opened();
        metrics.request_received();
        metrics.bus_message_published();
        metrics.backend_timeout();
        metrics.auth_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions.active, 1);
        assert_eq!(snapshot.traffic.requests_received, 1);
        assert_eq!(snapshot.bus.published, 1);
        assert_eq!(snapshot.backends.timeouts, 1);
        assert_eq!(snapshot.errors.auth_failures, 1);
    }
}
