//! TCP reachability probe.

use std::time::Duration;

use tracing::debug;

/// Result of a single connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    Connected,
    /// The connection was refused or the host could not be resolved.
    Refused,
    TimedOut,
}

impl ProbeResult {
    pub fn is_connected(&self) -> bool {
        matches!(self, ProbeResult::Connected)
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            ProbeResult::Connected => "connected",
            ProbeResult::Refused => "disconnected",
            ProbeResult::TimedOut => "timeout",
        }
    }
}

/// Open (and immediately drop) a TCP connection to `host:port`.
pub async fn tcp_probe(host: &str, port: u16, timeout: Duration) -> ProbeResult {
    match tokio::time::timeout(timeout, tokio::net::TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => ProbeResult::Connected,
        Ok(Err(e)) => {
            debug!(host, port, error = %e, "tcp probe refused");
            ProbeResult::Refused
        }
        Err(_) => {
            debug!(host, port, "tcp probe timed out");
            ProbeResult::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_connects_to_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let result = tcp_probe("127.0.0.1", port, Duration::from_secs(2)).await;
        assert_eq!(result, ProbeResult::Connected);
    }

    #[tokio::test]
    async fn probe_closed_port_is_not_connected() {
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = tcp_probe("127.0.0.1", port, Duration::from_secs(2)).await;
        assert!(!result.is_connected());
    }

    #[tokio::test]
    async fn probe_unresolvable_host_is_not_connected() {
        let result = tcp_probe("no-such-host.invalid", 22, Duration::from_secs(2)).await;
        assert!(!result.is_connected());
    }
}
