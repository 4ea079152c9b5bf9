//! Thread-safe metrics collection system
//!
//! Provides atomic counters and a mutex-protected sample window for tracking
//! operational statistics across client sessions, fan-out and the upstream
//! MQTT connection.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of fan-out timings kept for percentile calculation
const MAX_FANOUT_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Client sessions
    clients_connected: AtomicU64,
    clients_total: AtomicU64,
    frames_received: AtomicU64,
    invalid_frames: AtomicU64,
    unknown_frames: AtomicU64,
    subscribe_requests: AtomicU64,
    subscribe_failures: AtomicU64,
    publish_requests: AtomicU64,
    not_ready_rejections: AtomicU64,

    // Fan-out
    messages_routed: AtomicU64,
    deliveries: AtomicU64,
    dropped_deliveries: AtomicU64,
    fanout_times: Mutex<VecDeque<u64>>, // in microseconds

    // MQTT
    mqtt_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    reconnect_attempts: AtomicU64,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    messages_received: AtomicU64,
    connection_start_time: AtomicU64,

    // Lifecycle
    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            clients_connected: AtomicU64::new(0),
            clients_total: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            invalid_frames: AtomicU64::new(0),
            unknown_frames: AtomicU64::new(0),
            subscribe_requests: AtomicU64::new(0),
            subscribe_failures: AtomicU64::new(0),
            publish_requests: AtomicU64::new(0),
            not_ready_rejections: AtomicU64::new(0),
            messages_routed: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            dropped_deliveries: AtomicU64::new(0),
            fanout_times: Mutex::new(VecDeque::with_capacity(MAX_FANOUT_SAMPLES)),
            mqtt_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Client session metrics
    pub fn client_connected(&self) {
        self.clients_connected.fetch_add(1, Ordering::Relaxed);
        self.clients_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_disconnected(&self) {
        let _ = self
            .clients_connected
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalid_frame(&self) {
        self.invalid_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unknown_frame(&self) {
        self.unknown_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscribe_requested(&self) {
        self.subscribe_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscribe_failed(&self) {
        self.subscribe_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_requested(&self) {
        self.publish_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broker_not_ready(&self) {
        self.not_ready_rejections.fetch_add(1, Ordering::Relaxed);
    }

    // Fan-out metrics
    pub fn message_routed(&self, deliveries: usize, dropped: usize, duration: Duration) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);
        self.deliveries
            .fetch_add(deliveries as u64, Ordering::Relaxed);
        self.dropped_deliveries
            .fetch_add(dropped as u64, Ordering::Relaxed);

        if let Ok(mut times) = self.fanout_times.lock() {
            if times.len() >= MAX_FANOUT_SAMPLES {
                times.pop_front();
            }
            times.push_back(duration.as_micros() as u64);
        }
    }

    // MQTT metrics
    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn mqtt_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn mqtt_connection_lost(&self) {
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn mqtt_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_mqtt_connected(&self) -> bool {
        self.mqtt_connected.load(Ordering::Relaxed)
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.clients_connected,
            &self.clients_total,
            &self.frames_received,
            &self.invalid_frames,
            &self.unknown_frames,
            &self.subscribe_requests,
            &self.subscribe_failures,
            &self.publish_requests,
            &self.not_ready_rejections,
            &self.messages_routed,
            &self.deliveries,
            &self.dropped_deliveries,
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.reconnect_attempts,
            &self.messages_published,
            &self.publish_failures,
            &self.messages_received,
            &self.connection_start_time,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut times) = self.fanout_times.lock() {
            times.clear();
        }
    }

    /// Calculate fan-out time statistics (pure function)
    fn calculate_fanout_statistics(&self) -> (f64, f64, f64) {
        if let Ok(times) = self.fanout_times.lock() {
            if times.is_empty() {
                return (0.0, 0.0, 0.0);
            }
            let mut sorted_times: Vec<u64> = times.iter().copied().collect();
            sorted_times.sort_unstable();

            let avg = sorted_times.iter().sum::<u64>() as f64 / sorted_times.len() as f64;
            (
                avg,
                percentile(&sorted_times, 50.0),
                percentile(&sorted_times, 99.0),
            )
        } else {
            (0.0, 0.0, 0.0)
        }
    }

    /// Calculate connection duration (pure function)
    fn calculate_connection_duration(&self, now: u64) -> u64 {
        if !self.mqtt_connected.load(Ordering::Relaxed) {
            return 0;
        }
        let start_time = self.connection_start_time.load(Ordering::Relaxed);
        if start_time > 0 {
            now.saturating_sub(start_time)
        } else {
            0
        }
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_fanout_time_us, fanout_time_p50_us, fanout_time_p99_us) =
            self.calculate_fanout_statistics();

        MetricsSnapshot {
            clients: ClientMetrics {
                connected: self.clients_connected.load(Ordering::Relaxed),
                total: self.clients_total.load(Ordering::Relaxed),
                frames_received: self.frames_received.load(Ordering::Relaxed),
                invalid_frames: self.invalid_frames.load(Ordering::Relaxed),
                unknown_frames: self.unknown_frames.load(Ordering::Relaxed),
                subscribe_requests: self.subscribe_requests.load(Ordering::Relaxed),
                subscribe_failures: self.subscribe_failures.load(Ordering::Relaxed),
                publish_requests: self.publish_requests.load(Ordering::Relaxed),
                not_ready_rejections: self.not_ready_rejections.load(Ordering::Relaxed),
            },
            fanout: FanoutMetrics {
                messages_routed: self.messages_routed.load(Ordering::Relaxed),
                deliveries: self.deliveries.load(Ordering::Relaxed),
                dropped_deliveries: self.dropped_deliveries.load(Ordering::Relaxed),
                avg_fanout_time_us,
                fanout_time_p50_us,
                fanout_time_p99_us,
            },
            mqtt: MqttMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
                messages_published: self.messages_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                messages_received: self.messages_received.load(Ordering::Relaxed),
                connection_duration_seconds: self.calculate_connection_duration(now),
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// Public metrics structures
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub clients: ClientMetrics,
    pub fanout: FanoutMetrics,
    pub mqtt: MqttMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct ClientMetrics {
    pub connected: u64,
    pub total: u64,
    pub frames_received: u64,
    pub invalid_frames: u64,
    pub unknown_frames: u64,
    pub subscribe_requests: u64,
    pub subscribe_failures: u64,
    pub publish_requests: u64,
    pub not_ready_rejections: u64,
}

#[derive(Debug, Serialize)]
pub struct FanoutMetrics {
    pub messages_routed: u64,
    pub deliveries: u64,
    pub dropped_deliveries: u64,
    pub avg_fanout_time_us: f64,
    pub fanout_time_p50_us: f64,
    pub fanout_time_p99_us: f64,
}

#[derive(Debug, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub reconnect_attempts: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
    pub messages_received: u64,
    pub connection_duration_seconds: u64,
}

// Helper functions
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_index = index.floor() as usize;
        let upper_index = index.ceil() as usize;
        let lower_value = sorted_data[lower_index] as f64;
        let upper_value = sorted_data[upper_index] as f64;

        lower_value + (upper_value - lower_value) * index.fract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_client_metrics() {
        let collector = MetricsCollector::new();

        collector.client_connected();
        collector.client_connected();
        collector.client_disconnected();
        collector.invalid_frame();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.clients.connected, 1);
        assert_eq!(metrics.clients.total, 2);
        assert_eq!(metrics.clients.invalid_frames, 1);
    }

    #[test]
    fn test_client_gauge_never_underflows() {
        let collector = MetricsCollector::new();
        collector.client_disconnected();
        assert_eq!(collector.get_metrics().clients.connected, 0);
    }

    #[test]
    fn test_mqtt_metrics() {
        let collector = MetricsCollector::new();

        collector.mqtt_connection_attempt();
        collector.mqtt_connection_established();
        collector.mqtt_message_published();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.mqtt.connection_attempts, 1);
        assert_eq!(metrics.mqtt.connections_established, 1);
        assert_eq!(metrics.mqtt.messages_published, 1);
        assert!(metrics.mqtt.connected);

        collector.mqtt_connection_lost();
        collector.mqtt_reconnect_attempt();
        let metrics = collector.get_metrics();
        assert!(!metrics.mqtt.connected);
        assert_eq!(metrics.mqtt.reconnect_attempts, 1);
        assert_eq!(metrics.mqtt.connection_attempts, 2);
    }

    #[test]
    fn test_fanout_metrics() {
        let collector = MetricsCollector::new();

        collector.message_routed(3, 1, Duration::from_micros(40));
        collector.message_routed(0, 0, Duration::from_micros(20));

        let metrics = collector.get_metrics();
        assert_eq!(metrics.fanout.messages_routed, 2);
        assert_eq!(metrics.fanout.deliveries, 3);
        assert_eq!(metrics.fanout.dropped_deliveries, 1);
        assert!((metrics.fanout.avg_fanout_time_us - 30.0).abs() < 0.1);
    }

    #[test]
    fn test_fanout_samples_are_bounded() {
        let collector = MetricsCollector::new();
        for i in 0..1500 {
            collector.message_routed(1, 0, Duration::from_micros(i));
        }
        let times = collector.fanout_times.lock().unwrap();
        assert_eq!(times.len(), MAX_FANOUT_SAMPLES);
        // Oldest samples are evicted first
        assert_eq!(times.front(), Some(&500));
        assert_eq!(times.back(), Some(&1499));
    }

    #[test]
    fn test_thread_safety() {
        let collector = Arc::new(MetricsCollector::new());

        let mut handles = vec![];

        for _ in 0..10 {
            let collector_clone = Arc::clone(&collector);
            let handle = thread::spawn(move || {
                for _ in 0..100 {
                    collector_clone.frame_received();
                    collector_clone.mqtt_message_published();
                }
            });
            handles.push(handle);
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let metrics = collector.get_metrics();
        assert_eq!(metrics.clients.frames_received, 1000);
        assert_eq!(metrics.mqtt.messages_published, 1000);
    }

    #[test]
    fn test_percentile_calculation() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];

        let p50 = percentile(&data, 50.0);
        let p0 = percentile(&data, 0.0);
        let p100 = percentile(&data, 100.0);

        assert!((p50 - 5.5).abs() < 0.1, "P50: expected ~5.5, got {p50}");
        assert!((p0 - 1.0).abs() < 0.1);
        assert!((p100 - 10.0).abs() < 0.1);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_reset_functionality() {
        let collector = MetricsCollector::new();

        collector.client_connected();
        collector.mqtt_connection_established();
        collector.message_routed(1, 0, Duration::from_micros(5));

        collector.reset();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.clients.total, 0);
        assert_eq!(metrics.fanout.messages_routed, 0);
        assert!(!metrics.mqtt.connected);
        assert_eq!(metrics.fanout.avg_fanout_time_us, 0.0);
    }
}
