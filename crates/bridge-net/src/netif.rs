//! Local address selection for the USB-C link.
//!
//! When the two machines are joined by a USB-C cable the link shows up as
//! a virtual Ethernet adapter (RNDIS on Windows, CDC on macOS). Those
//! interfaces are preferred over Wi-Fi/LAN because the point-to-point link
//! has the bandwidth headroom for raw frames.
//!
//! Interface *enumeration* is platform-specific and lives behind whatever
//! the application provides; the selection policy here is pure and
//! testable.

use std::net::Ipv4Addr;

/// One enumerated network interface candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// Human-readable adapter description (e.g. "Remote NDIS based
    /// Internet Sharing Device").
    pub description: String,
    /// The interface's IPv4 address.
    pub addr: Ipv4Addr,
    pub is_up: bool,
    pub is_loopback: bool,
}

/// Picks the best local IPv4 address from enumerated candidates.
///
/// Preference order:
/// 1. An up, non-loopback interface whose description suggests a USB-C
///    virtual Ethernet link ("RNDIS", "CDC", or "USB" together with
///    "Ethernet").
/// 2. The first up, non-loopback IPv4 interface.
pub fn preferred_local_addr(candidates: &[InterfaceInfo]) -> Option<Ipv4Addr> {
    let usable = || {
        candidates
            .iter()
            .filter(|i| i.is_up && !i.is_loopback && !i.addr.is_unspecified())
    };

    if let Some(usb) = usable().find(|i| looks_like_usb_link(&i.description)) {
        return Some(usb.addr);
    }
    usable().next().map(|i| i.addr)
}

/// `true` when the adapter description suggests a USB-tethered virtual
/// Ethernet device.
fn looks_like_usb_link(description: &str) -> bool {
    let desc = description.to_ascii_uppercase();
    desc.contains("RNDIS")
        || desc.contains("CDC")
        || (desc.contains("USB") && desc.contains("ETHERNET"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(description: &str, addr: [u8; 4]) -> InterfaceInfo {
        InterfaceInfo {
            description: description.to_string(),
            addr: addr.into(),
            is_up: true,
            is_loopback: false,
        }
    }

    #[test]
    fn test_prefers_rndis_over_lan() {
        let candidates = vec![
            iface("Intel(R) Ethernet Connection", [192, 168, 1, 10]),
            iface("Remote NDIS based Internet Sharing Device", [169, 254, 7, 2]),
        ];
        assert_eq!(
            preferred_local_addr(&candidates),
            Some([169, 254, 7, 2].into())
        );
    }

    #[test]
    fn test_prefers_cdc_adapter() {
        let candidates = vec![
            iface("Wi-Fi", [10, 0, 0, 5]),
            iface("CDC Composite Gadget", [172, 16, 0, 2]),
        ];
        assert_eq!(
            preferred_local_addr(&candidates),
            Some([172, 16, 0, 2].into())
        );
    }

    #[test]
    fn test_usb_alone_is_not_enough() {
        // "USB" must pair with "Ethernet" to qualify.
        let candidates = vec![
            iface("USB Audio Device", [192, 168, 1, 30]),
            iface("Realtek PCIe GbE", [192, 168, 1, 20]),
        ];
        // Neither matches the USB rule; first active wins.
        assert_eq!(
            preferred_local_addr(&candidates),
            Some([192, 168, 1, 30].into())
        );
    }

    #[test]
    fn test_usb_ethernet_combination_matches() {
        let candidates = vec![
            iface("Realtek PCIe GbE", [192, 168, 1, 20]),
            iface("USB 10/100/1000 LAN Ethernet Adapter", [192, 168, 2, 2]),
        ];
        assert_eq!(
            preferred_local_addr(&candidates),
            Some([192, 168, 2, 2].into())
        );
    }

    #[test]
    fn test_falls_back_to_first_active_non_loopback() {
        let candidates = vec![
            InterfaceInfo {
                description: "Loopback".into(),
                addr: [127, 0, 0, 1].into(),
                is_up: true,
                is_loopback: true,
            },
            InterfaceInfo {
                description: "Ethernet (unplugged)".into(),
                addr: [192, 168, 1, 40].into(),
                is_up: false,
                is_loopback: false,
            },
            iface("Wi-Fi", [10, 1, 2, 3]),
        ];
        assert_eq!(preferred_local_addr(&candidates), Some([10, 1, 2, 3].into()));
    }

    #[test]
    fn test_no_candidates_yields_none() {
        assert_eq!(preferred_local_addr(&[]), None);
        let only_loopback = vec![InterfaceInfo {
            description: "lo".into(),
            addr: [127, 0, 0, 1].into(),
            is_up: true,
            is_loopback: true,
        }];
        assert_eq!(preferred_local_addr(&only_loopback), None);
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        assert!(looks_like_usb_link("rndis gadget"));
        assert!(looks_like_usb_link("Apple USB ethernet adapter"));
        assert!(!looks_like_usb_link("Intel Wireless-AC"));
    }
}
