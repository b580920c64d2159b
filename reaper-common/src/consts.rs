pub const TOKEN_HEADER: &str = "X-Reaper-Token";
pub const TOKEN_FILE_NAME: &str = "api-token";

/// External packet filters commonly cap the number of addresses per rule.
pub const MAX_ADDRESSES_PER_RULE: usize = 1000;

pub const FIREWALL_RULE_PREFIX: &str = "reaper-block";

pub const PLACEHOLDER_IP: &str = "-";
