// Linux TC HTB + IFB shaping backend
//
// REQUIREMENTS:
// - tc and ip (iproute2)
// - IFB kernel module (ifb) for download shaping
//
// Upload: HTB root qdisc on the primary interface, one class at the upload rate.
// Download: ingress qdisc on the primary interface redirects everything to
// the IFB device, which carries an HTB class at the download rate.
// Whole-interface shaping; there is no per-process classification here.

use crate::backends::shaping::{Invocation, ShapingBackend};
use crate::backends::{BackendPriority, command_exists};
use crate::limit::{Rate, ShapingLimit};
use anyhow::{Result, anyhow};

const IFB_DEVICE: &str = "ifb0";

/// Detect the primary network interface
/// Prefers interfaces with IPv4 addresses
pub fn detect_interface() -> Result<String> {
    let interfaces = pnet_datalink::interfaces();

    if let Some(iface) = interfaces.iter().find(|iface| {
        iface.is_up() && !iface.is_loopback() && iface.ips.iter().any(|ip| ip.is_ipv4())
    }) {
        log::debug!("tc backend using IPv4 interface: {}", iface.name);
        return Ok(iface.name.clone());
    }

    if let Some(iface) = interfaces
        .into_iter()
        .find(|iface| iface.is_up() && !iface.is_loopback() && !iface.ips.is_empty())
    {
        log::warn!("No IPv4 interface found, using: {}", iface.name);
        return Ok(iface.name);
    }

    Err(anyhow!("No suitable network interface found"))
}

fn render_rate(rate: Rate) -> String {
    format!("{}kbit", rate.kbps())
}

/// Interface-wide HTB shaping with IFB for ingress
#[derive(Debug, Clone)]
pub struct TcIfb {
    interface: String,
    ifb_device: String,
}

impl TcIfb {
    pub fn new() -> Result<Self> {
        Ok(Self::with_interface(&detect_interface()?))
    }

    pub fn with_interface(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            ifb_device: IFB_DEVICE.to_string(),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn class(&self, device: &str, verb: &str, rate: Rate) -> Invocation {
        let rate = render_rate(rate);
        Invocation::new(format!(
            "tc class {} dev {} parent 1: classid 1:1 htb rate {} ceil {}",
            verb, device, rate, rate
        ))
    }
}

impl ShapingBackend for TcIfb {
    fn name(&self) -> &'static str {
        "tc"
    }

    fn priority(&self) -> BackendPriority {
        BackendPriority::Good
    }

    fn is_available() -> bool {
        command_exists("tc") && command_exists("ip")
    }

    fn setup(&self, limit: &ShapingLimit) -> Vec<Invocation> {
        let (iface, ifb) = (&self.interface, &self.ifb_device);
        vec![
            Invocation::new("modprobe ifb numifbs=1 2>/dev/null || true"),
            Invocation::new(format!(
                "ip link show {ifb} >/dev/null 2>&1 || ip link add {ifb} type ifb"
            )),
            Invocation::new(format!("ip link set dev {ifb} up")),
            // Upload: egress HTB on the real interface
            Invocation::new(format!(
                "tc qdisc replace dev {iface} root handle 1: htb default 1"
            )),
            self.class(iface, "replace", limit.upload()),
            // Download: redirect ingress to IFB and shape its egress
            Invocation::new(format!(
                "tc qdisc replace dev {iface} handle ffff: ingress"
            )),
            Invocation::new(format!(
                "tc filter replace dev {iface} parent ffff: protocol all prio 1 u32 match u32 0 0 action mirred egress redirect dev {ifb}"
            )),
            Invocation::new(format!(
                "tc qdisc replace dev {ifb} root handle 1: htb default 1"
            )),
            self.class(ifb, "replace", limit.download()),
        ]
    }

    fn update(&self, _previous: &ShapingLimit, next: &ShapingLimit) -> Vec<Invocation> {
        // Both directions always have a class, so a layout change needs no rebinding
        vec![
            self.class(&self.interface, "change", next.upload()),
            self.class(&self.ifb_device, "change", next.download()),
        ]
    }

    fn teardown(&self) -> Vec<Invocation> {
        let (iface, ifb) = (&self.interface, &self.ifb_device);
        vec![
            Invocation::new(format!("tc qdisc del dev {iface} root 2>/dev/null || true")),
            Invocation::new(format!(
                "tc qdisc del dev {iface} ingress 2>/dev/null || true"
            )),
            Invocation::new(format!("ip link del {ifb} 2>/dev/null || true")),
        ]
    }

    fn helper_args(&self) -> Vec<String> {
        vec!["--interface".to_string(), self.interface.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(kbps: u64) -> Rate {
        Rate::new(kbps).unwrap()
    }

    #[test]
    fn test_setup_shapes_both_directions() {
        let backend = TcIfb::with_interface("eth0");
        let limit = ShapingLimit::Split {
            download: rate(10_000),
            upload: rate(5_000),
        };
        let setup: Vec<String> = backend
            .setup(&limit)
            .iter()
            .map(|i| i.to_string())
            .collect();

        assert!(setup.contains(
            &"tc class replace dev eth0 parent 1: classid 1:1 htb rate 5000kbit ceil 5000kbit"
                .to_string()
        ));
        assert!(setup.contains(
            &"tc class replace dev ifb0 parent 1: classid 1:1 htb rate 10000kbit ceil 10000kbit"
                .to_string()
        ));
        assert!(setup.iter().any(|l| l.contains("mirred egress redirect dev ifb0")));
    }

    #[test]
    fn test_update_changes_classes_in_place() {
        let backend = TcIfb::with_interface("eth0");
        let update = backend.update(
            &ShapingLimit::Single(rate(500)),
            &ShapingLimit::Single(rate(2000)),
        );
        assert_eq!(update.len(), 2);
        assert!(update.iter().all(|i| i.as_str().contains("htb rate 2000kbit")));
        assert!(update.iter().all(|i| i.as_str().starts_with("tc class change")));
    }

    #[test]
    fn test_teardown_is_tolerant_of_missing_state() {
        let backend = TcIfb::with_interface("eth0");
        for invocation in backend.teardown() {
            assert!(invocation.as_str().ends_with("|| true"));
        }
    }

    #[test]
    fn test_helper_args_carry_interface() {
        let backend = TcIfb::with_interface("wlan0");
        assert_eq!(backend.helper_args(), vec!["--interface", "wlan0"]);
        assert_eq!(backend.interface(), "wlan0");
    }
}
