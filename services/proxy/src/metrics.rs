//! StatsD UDP counters.
//!
//! Fire-and-forget: a counter increment never blocks the request path and a send failure is
//! only logged, never propagated. Lines are built by hand (`<prefix><name>:<value>|c`) since no
//! crate in the dependency stack ships a StatsD client.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::warn;

const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Fire-and-forget StatsD sink. Counters accumulate in-process and are flushed to the
/// configured UDP endpoint on a 1 s tick; a counter that is still zero since the last flush is
/// not sent at all.
pub struct MetricsSink {
    prefix: String,
    socket: UdpSocket,
    target: String,
    counters: Mutex<HashMap<String, u64>>,
}

impl MetricsSink {
    /// Binds an ephemeral UDP socket and connects it to `target` (`host:port`).
    pub async fn connect(target: String, prefix: String) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(&target).await?;
        Ok(Self {
            prefix,
            socket,
            target,
            counters: Mutex::new(HashMap::new()),
        })
    }

    pub fn incr(&self, name: &str) {
        self.incr_by(name, 1);
    }

    pub fn incr_by(&self, name: &str, value: u64) {
        let mut counters = self.counters.lock().unwrap();
        *counters.entry(name.to_string()).or_insert(0) += value;
    }

    /// Spawns the 1 s flush loop. Returns a handle whose drop does not stop the loop; callers
    /// that want an orderly shutdown should select on a separate cancellation signal.
    pub fn spawn_flush_loop(self: std::sync::Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
            loop {
                ticker.tick().await;
                self.flush().await;
            }
        });
    }

    async fn flush(&self) {
        let pending: Vec<(String, u64)> = {
            let mut counters = self.counters.lock().unwrap();
            let pending = counters
                .iter()
                .filter(|(_, v)| **v > 0)
                .map(|(k, v)| (k.clone(), *v))
                .collect();
            counters.values_mut().for_each(|v| *v = 0);
            pending
        };

        for (name, value) in pending {
            let line = format!("{}{name}:{value}|c", self.prefix);
            if let Err(err) = self.socket.send(line.as_bytes()).await {
                warn!(target = %self.target, error = %err, "statsd send failed");
            }
        }
    }
}
