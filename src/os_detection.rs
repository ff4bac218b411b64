//! Heuristic platform and OS classification
//!
//! Classification is a first-match walk over ordered rule tables. Hostname
//! tokens are consulted before port signals; adding a rule means adding a
//! row, not another branch.

use std::time::Duration;

use crate::core::{AssetType, PortStates, UNKNOWN};

pub const PORT_SSH: u16 = 22;
pub const PORT_SMB: u16 = 445;
pub const PORT_RDP: u16 = 3389;

/// Condition a rule checks against a host
#[derive(Debug, Clone, Copy)]
pub enum Matcher {
    /// Lowercased hostname contains any of the tokens
    HostnameContains(&'static [&'static str]),
    PortOpen(u16),
    /// First port open while the second is closed
    PortOpenWithout(u16, u16),
}

impl Matcher {
    fn matches(&self, hostname: &str, ports: &PortStates) -> bool {
        let open = |port: &u16| ports.get(port).copied().unwrap_or(false);
        match self {
            Self::HostnameContains(tokens) => tokens.iter().any(|token| hostname.contains(token)),
            Self::PortOpen(port) => open(port),
            Self::PortOpenWithout(port, absent) => open(port) && !open(absent),
        }
    }
}

const WINDOWS_TOKENS: &[&str] = &["win", "desktop", "laptop"];
const LINUX_TOKENS: &[&str] = &["linux", "ubuntu", "debian", "cent"];
const MAC_TOKENS: &[&str] = &["mac", "apple", "mbp", "imac"];
const NETWORK_TOKENS: &[&str] = &["cisco", "router", "switch", "gateway", "access-point"];

pub const ASSET_TYPE_RULES: &[(Matcher, AssetType)] = &[
    (Matcher::HostnameContains(WINDOWS_TOKENS), AssetType::Windows),
    (Matcher::HostnameContains(LINUX_TOKENS), AssetType::Linux),
    (Matcher::HostnameContains(MAC_TOKENS), AssetType::Mac),
    (Matcher::HostnameContains(NETWORK_TOKENS), AssetType::NetworkDevice),
    (Matcher::PortOpen(PORT_RDP), AssetType::Windows),
    (Matcher::PortOpenWithout(PORT_SSH, PORT_SMB), AssetType::Linux),
];

pub const OS_RULES: &[(Matcher, &str)] = &[
    (Matcher::HostnameContains(&["win"]), "Windows"),
    (Matcher::HostnameContains(&["ubuntu"]), "Ubuntu Linux"),
    (Matcher::HostnameContains(&["debian"]), "Debian Linux"),
    (Matcher::HostnameContains(&["cent"]), "CentOS Linux"),
    (Matcher::HostnameContains(&["fedora"]), "Fedora Linux"),
    (Matcher::HostnameContains(&["red hat", "redhat"]), "Red Hat Linux"),
    (Matcher::HostnameContains(&["linux"]), "Linux"),
    (Matcher::HostnameContains(MAC_TOKENS), "macOS"),
    (Matcher::PortOpen(PORT_RDP), "Windows"),
    (Matcher::PortOpenWithout(PORT_SSH, PORT_SMB), "Unix/Linux"),
];

const MAC_MODEL_RULES: &[(Matcher, &str)] = &[
    (Matcher::HostnameContains(&["macbook"]), "MacBook"),
    (Matcher::HostnameContains(&["imac"]), "iMac"),
    (Matcher::HostnameContains(&["mac mini", "macmini", "mac-mini"]), "Mac Mini"),
    (Matcher::HostnameContains(&["macpro", "mac-pro"]), "Mac Pro"),
];

fn first_match<T: Copy>(rules: &[(Matcher, T)], hostname: &str, ports: &PortStates) -> Option<T> {
    let hostname = hostname.to_lowercase();
    rules
        .iter()
        .find(|(matcher, _)| matcher.matches(&hostname, ports))
        .map(|(_, value)| *value)
}

pub fn classify_asset_type(hostname: &str, ports: &PortStates) -> AssetType {
    first_match(ASSET_TYPE_RULES, hostname, ports).unwrap_or(AssetType::Unknown)
}

pub fn classify_os(hostname: &str, ports: &PortStates) -> String {
    first_match(OS_RULES, hostname, ports)
        .unwrap_or(UNKNOWN)
        .to_string()
}

pub fn mac_model_guess(hostname: &str) -> &'static str {
    first_match(MAC_MODEL_RULES, hostname, &PortStates::new()).unwrap_or("Mac")
}

/// Hosts worth running the introspection cascade against
pub fn looks_like_windows(asset_type: AssetType, ports: &PortStates) -> bool {
    let open = |port: u16| ports.get(&port).copied().unwrap_or(false);
    asset_type == AssetType::Windows || open(PORT_RDP) || open(PORT_SMB)
}

/// macOS release estimated from SSH handshake latency. Low confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacOsEstimate {
    pub estimate: &'static str,
    pub guess: &'static str,
}

const MACOS_LATENCY_RULES: &[(u128, MacOsEstimate)] = &[
    (
        20,
        MacOsEstimate {
            estimate: "macOS 14 (Sonoma) - Estimated",
            guess: "Likely macOS 14 (Sonoma)",
        },
    ),
    (
        30,
        MacOsEstimate {
            estimate: "macOS 13 (Ventura) - Estimated",
            guess: "Likely macOS 13 (Ventura)",
        },
    ),
];

const MACOS_OLDER: MacOsEstimate = MacOsEstimate {
    estimate: "macOS 12 or earlier - Estimated",
    guess: "Likely macOS 12 or earlier",
};

pub fn estimate_macos_version(ssh_latency: Duration) -> MacOsEstimate {
    let millis = ssh_latency.as_millis();
    MACOS_LATENCY_RULES
        .iter()
        .find(|(below, _)| millis < *below)
        .map(|(_, estimate)| *estimate)
        .unwrap_or(MACOS_OLDER)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports(open: &[u16]) -> PortStates {
        let mut states: PortStates = [21, 22, 23, 25, 53, 80, 443, 445, 3389]
            .into_iter()
            .map(|port| (port, false))
            .collect();
        for port in open {
            states.insert(*port, true);
        }
        states
    }

    #[test]
    fn test_hostname_tokens_win_over_ports() {
        assert_eq!(classify_asset_type("WIN-FS01.corp", &ports(&[22])), AssetType::Windows);
        assert_eq!(classify_asset_type("build-ubuntu-3", &ports(&[3389])), AssetType::Linux);
        assert_eq!(classify_asset_type("Janes-MBP", &ports(&[])), AssetType::Mac);
        assert_eq!(classify_asset_type("core-switch-2", &ports(&[22])), AssetType::NetworkDevice);
    }

    #[test]
    fn test_port_signals() {
        assert_eq!(classify_asset_type("10.0.0.7", &ports(&[3389])), AssetType::Windows);
        assert_eq!(classify_asset_type("10.0.0.8", &ports(&[22])), AssetType::Linux);
        assert_eq!(classify_asset_type("10.0.0.9", &ports(&[22, 445])), AssetType::Unknown);
        assert_eq!(classify_asset_type("10.0.0.10", &ports(&[80])), AssetType::Unknown);
    }

    #[test]
    fn test_rule_order_in_asset_table() {
        // "desktop" is checked before mac tokens
        assert_eq!(classify_asset_type("imac-desktop", &ports(&[])), AssetType::Windows);
        // "cent" appears in "accent" and is a linux token
        assert_eq!(classify_asset_type("accent-router", &ports(&[])), AssetType::Linux);
    }

    #[test]
    fn test_os_classification() {
        assert_eq!(classify_os("win10-lab", &ports(&[])), "Windows");
        assert_eq!(classify_os("ubuntu-web", &ports(&[])), "Ubuntu Linux");
        assert_eq!(classify_os("debian-db", &ports(&[])), "Debian Linux");
        assert_eq!(classify_os("centos7", &ports(&[])), "CentOS Linux");
        assert_eq!(classify_os("fedora-ws", &ports(&[])), "Fedora Linux");
        assert_eq!(classify_os("redhat-app", &ports(&[])), "Red Hat Linux");
        assert_eq!(classify_os("arch-linux", &ports(&[])), "Linux");
        assert_eq!(classify_os("office-imac", &ports(&[])), "macOS");
        assert_eq!(classify_os("10.1.1.1", &ports(&[3389])), "Windows");
        assert_eq!(classify_os("10.1.1.2", &ports(&[22])), "Unix/Linux");
        assert_eq!(classify_os("printer", &ports(&[80])), UNKNOWN);
    }

    #[test]
    fn test_missing_port_entries_count_as_closed() {
        assert_eq!(classify_asset_type("host", &PortStates::new()), AssetType::Unknown);
    }

    #[test]
    fn test_mac_model_guess() {
        assert_eq!(mac_model_guess("Janes-MacBook-Pro"), "MacBook");
        assert_eq!(mac_model_guess("reception-imac"), "iMac");
        assert_eq!(mac_model_guess("studio-mac-mini"), "Mac Mini");
        assert_eq!(mac_model_guess("render-macpro"), "Mac Pro");
        assert_eq!(mac_model_guess("apple-tv"), "Mac");
    }

    #[test]
    fn test_windows_trigger() {
        assert!(looks_like_windows(AssetType::Windows, &ports(&[])));
        assert!(looks_like_windows(AssetType::Unknown, &ports(&[445])));
        assert!(looks_like_windows(AssetType::Linux, &ports(&[3389])));
        assert!(!looks_like_windows(AssetType::Linux, &ports(&[22])));
    }

    #[test]
    fn test_macos_latency_estimate() {
        assert_eq!(
            estimate_macos_version(Duration::from_millis(5)).estimate,
            "macOS 14 (Sonoma) - Estimated"
        );
        assert_eq!(
            estimate_macos_version(Duration::from_millis(25)).guess,
            "Likely macOS 13 (Ventura)"
        );
        assert_eq!(estimate_macos_version(Duration::from_millis(30)), MACOS_OLDER);
    }
}
