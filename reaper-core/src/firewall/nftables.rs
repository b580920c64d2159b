use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::*;

use reaper_common::ReaperError;

use super::PacketFilter;

const TABLE: &str = "inet reaper";
const CHAIN: &str = "input";
const NFT_TIMEOUT: Duration = Duration::from_secs(5);

/// Packet filter backed by nftables. Rules live in a dedicated table so a
/// full rewrite is a chain flush plus one rule per address chunk; nothing
/// outside the table is ever touched.
pub struct NftablesFilter;

impl NftablesFilter {
    pub fn new() -> Self {
        Self
    }

    async fn run_nft(&self, args: &str) -> Result<(), ReaperError> {
        let output = tokio::time::timeout(
            NFT_TIMEOUT,
            Command::new("nft").args(args.split_whitespace()).output(),
        )
        .await
        .map_err(|_| ReaperError::Other("nft command timed out".into()))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ReaperError::Other(
                format!("nft {args}: {}", stderr.trim()).into(),
            ));
        }
        Ok(())
    }

    async fn ensure_table(&self) -> Result<(), ReaperError> {
        self.run_nft(&format!("add table {TABLE}")).await?;
        // "add chain" is idempotent like "add table"
        self.run_nft(&format!(
            "add chain {TABLE} {CHAIN} {{ type filter hook input priority -10 ; }}"
        ))
        .await
    }
}

impl Default for NftablesFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PacketFilter for NftablesFilter {
    async fn remove_rules(&self, _prefix: &str) -> Result<(), ReaperError> {
        self.ensure_table().await?;
        self.run_nft(&format!("flush chain {TABLE} {CHAIN}")).await
    }

    async fn install_rule(
        &self,
        name: &str,
        port: u16,
        addresses: &[String],
    ) -> Result<(), ReaperError> {
        let (v4, v6): (Vec<&String>, Vec<&String>) =
            addresses.iter().partition(|a| is_ipv4_address(a));

        for (selector, set) in [("ip saddr", v4), ("ip6 saddr", v6)] {
            if set.is_empty() {
                continue;
            }
            let list = set
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            self.run_nft(&format!(
                "add rule {TABLE} {CHAIN} tcp dport {port} {selector} {{ {list} }} drop comment \"{name}\""
            ))
            .await?;
        }

        debug!(name, count = addresses.len(), "Installed filter rule");
        Ok(())
    }
}

fn is_ipv4_address(address: &str) -> bool {
    let bare = address.split('/').next().unwrap_or(address);
    matches!(bare.parse::<IpAddr>(), Ok(IpAddr::V4(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_family_detection() {
        assert!(is_ipv4_address("203.0.113.7"));
        assert!(is_ipv4_address("203.0.113.0/24"));
        assert!(!is_ipv4_address("2001:db8::1"));
        assert!(!is_ipv4_address("garbage"));
    }
}
