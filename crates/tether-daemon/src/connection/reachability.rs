use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

#[async_trait]
pub trait ReachabilityCheck: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Reachable if a TCP connect to any endpoint completes within the timeout.
pub struct TcpReachability {
    endpoints: Vec<String>,
    timeout: Duration,
}

impl TcpReachability {
    pub fn new(endpoints: Vec<String>, timeout: Duration) -> Self {
        Self { endpoints, timeout }
    }
}

#[async_trait]
impl ReachabilityCheck for TcpReachability {
    async fn is_reachable(&self) -> bool {
        if self.endpoints.is_empty() {
            return true;
        }
        for endpoint in &self.endpoints {
            match tokio::time::timeout(self.timeout, TcpStream::connect(endpoint.as_str())).await {
                Ok(Ok(_)) => return true,
                Ok(Err(e)) => debug!("Reachability check {} failed: {}", endpoint, e),
                Err(_) => debug!("Reachability check {} timed out", endpoint),
            }
        }
        false
    }
}

pub struct AlwaysReachable;

#[async_trait]
impl ReachabilityCheck for AlwaysReachable {
    async fn is_reachable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_local_listener_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let check = TcpReachability::new(vec![addr], Duration::from_secs(1));
        assert!(check.is_reachable().await);
    }

    #[tokio::test]
    async fn test_closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let check = TcpReachability::new(vec![addr], Duration::from_secs(1));
        assert!(!check.is_reachable().await);
    }
}
