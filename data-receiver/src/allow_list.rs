use crate::config::{AllowListConfig, ValidationError};
use crate::errors::DataReceiverError;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

/// Exact-match list of peer addresses allowed to submit batches.
///
/// When not enforced, unlisted peers are only logged.
#[derive(Clone, Debug)]
pub struct AllowList {
    ips: HashSet<IpAddr>,
    enforce: bool,
}

impl AllowList {
    pub fn from_config(config: &AllowListConfig) -> Result<Self, ValidationError> {
        let ips: HashSet<IpAddr> = config
            .parse()?
            .into_iter()
            .map(|ip| ip.to_canonical())
            .collect();

        if config.enforce && ips.is_empty() {
            tracing::warn!("Allow list is enforced but empty; every batch will be rejected");
        }

        Ok(AllowList {
            ips,
            enforce: config.enforce,
        })
    }

    /// Checks the peer a request arrived from. An unknown peer is never listed.
    pub fn check(&self, peer: Option<SocketAddr>) -> Result<(), DataReceiverError> {
        let ip = peer.map(|addr| addr.ip().to_canonical());
        if ip.is_some_and(|ip| self.ips.contains(&ip)) {
            return Ok(());
        }

        let peer = ip.map_or_else(|| "unknown".to_string(), |ip| ip.to_string());
        if self.enforce {
            tracing::warn!(peer = %peer, "Rejected batch from peer not in allow list");
            return Err(DataReceiverError::Forbidden(peer));
        }

        if !self.ips.is_empty() {
            tracing::debug!(peer = %peer, "Peer not in allow list");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow_list(ips: &[&str], enforce: bool) -> AllowList {
        AllowList::from_config(&AllowListConfig {
            ips: ips.iter().map(|ip| ip.to_string()).collect(),
            enforce,
        })
        .unwrap()
    }

    fn peer(addr: &str) -> Option<SocketAddr> {
        Some(addr.parse().unwrap())
    }

    #[test]
    fn test_enforced() {
        let list = allow_list(&["10.0.0.1", "::1"], true);

        assert!(list.check(peer("10.0.0.1:5000")).is_ok());
        assert!(list.check(peer("[::1]:5000")).is_ok());
        // IPv4-mapped IPv6 peers match their IPv4 entry
        assert!(list.check(peer("[::ffff:10.0.0.1]:5000")).is_ok());

        assert!(matches!(
            list.check(peer("10.0.0.2:5000")),
            Err(DataReceiverError::Forbidden(ip)) if ip == "10.0.0.2"
        ));
        assert!(matches!(
            list.check(None),
            Err(DataReceiverError::Forbidden(ip)) if ip == "unknown"
        ));
    }

    #[test]
    fn test_not_enforced() {
        let list = allow_list(&["10.0.0.1"], false);
        assert!(list.check(peer("10.0.0.2:5000")).is_ok());
        assert!(list.check(None).is_ok());

        let list = allow_list(&[], false);
        assert!(list.check(peer("192.168.1.1:80")).is_ok());
    }

    #[test]
    fn test_enforced_and_empty_rejects_everyone() {
        let list = allow_list(&[], true);
        assert!(list.check(peer("127.0.0.1:80")).is_err());
    }
}
