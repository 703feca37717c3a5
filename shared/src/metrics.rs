use cadence::{Counted, StatsdClient, Timed, UdpMetricSink};
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

pub use cadence::MetricError;

enum MetricsBackend {
    Statsd(StatsdClient),
    Noop,
}

/// Handle for emitting runtime metrics over StatsD.
///
/// Constructed once at process start and passed into every component
/// that reports; cloning is cheap. Recording is fire-and-forget: a
/// metric that cannot be sent is logged and dropped, it never changes
/// the caller's outcome.
#[derive(Clone)]
pub struct Metrics {
    backend: Arc<MetricsBackend>,
}

impl Metrics {
    /// Create a Metrics client that sends to StatsD.
    pub fn new(statsd_host: &str, statsd_port: u16, prefix: &str) -> Result<Self, MetricError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;

        let addr = format!("{statsd_host}:{statsd_port}");
        let sink = UdpMetricSink::from(addr, socket)?;
        let client = StatsdClient::from_sink(prefix, sink);

        Ok(Metrics {
            backend: Arc::new(MetricsBackend::Statsd(client)),
        })
    }

    /// Create a Metrics client that discards everything. Used when no
    /// StatsD endpoint is configured, and by tests.
    pub fn new_noop() -> Self {
        Metrics {
            backend: Arc::new(MetricsBackend::Noop),
        }
    }

    /// Increment a counter by 1.
    ///
    /// `metrics.incr("cache.hit", &[("tier", "local")]);`
    pub fn incr(&self, metric: &str, tags: &[(&str, &str)]) {
        self.count(metric, 1, tags);
    }

    /// Add `count` to a counter.
    pub fn count(&self, metric: &str, count: i64, tags: &[(&str, &str)]) {
        let client = match self.backend.as_ref() {
            MetricsBackend::Statsd(client) => client,
            MetricsBackend::Noop => return,
        };

        let result = if tags.is_empty() {
            client.count(metric, count)
        } else {
            let mut counter = client.count_with_tags(metric, count);
            for (key, value) in tags {
                counter = counter.with_tag(key, value);
            }
            counter.try_send()
        };

        if let Err(e) = result {
            tracing::warn!(metric, error = %e, "failed to send counter");
        }
    }

    /// Record a timing.
    ///
    /// `metrics.timing("resolve.duration", started.elapsed(), &[("project", "acme")]);`
    pub fn timing(&self, metric: &str, elapsed: Duration, tags: &[(&str, &str)]) {
        let client = match self.backend.as_ref() {
            MetricsBackend::Statsd(client) => client,
            MetricsBackend::Noop => return,
        };

        let result = if tags.is_empty() {
            client.time(metric, elapsed)
        } else {
            let mut timer = client.time_with_tags(metric, elapsed);
            for (key, value) in tags {
                timer = timer.with_tag(key, value);
            }
            timer.try_send()
        };

        if let Err(e) = result {
            tracing::warn!(metric, error = %e, "failed to send timing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_client_accepts_everything() {
        let metrics = Metrics::new_noop();
        metrics.incr("some.counter", &[]);
        metrics.count("some.counter", 42, &[("tag", "value")]);
        metrics.timing("some.timer", Duration::from_millis(5), &[("tag", "value")]);
    }

    #[test]
    fn statsd_client_sends_without_error() {
        // Nothing listens on the port; UDP sends are fire-and-forget.
        let metrics = Metrics::new("127.0.0.1", 8125, "test").unwrap();
        metrics.incr("some.counter", &[("tier", "local")]);
        metrics.timing("some.timer", Duration::from_millis(5), &[]);
    }
}
