// macOS dummynet + PF shaping backend
//
// Uses:
// - dnctl (dummynet) for bandwidth shaping pipes
// - PF (PacketFilter) dummynet rules for traffic classification
//
// Architecture:
// 1. Create one pipe (single mode) or two pipes (split mode)
//    dnctl pipe N config bw XMbit/s
// 2. Route all TCP/UDP traffic through them, inbound to the download pipe
//    and outbound to the upload pipe
//    dummynet in proto { tcp, udp } from any to any pipe N
// 3. Enable PF
//
// Limitations:
// - Rules are loaded into the main ruleset (anchors don't work for dummynet
//   rules on macOS), so teardown reloads /etc/pf.conf
// - Granularity is whatever dummynet offers; rates are rendered in whole
//   megabits above 1000 Kbps

use crate::backends::shaping::{Invocation, ShapingBackend};
use crate::backends::{BackendPriority, shell_quote};
use crate::limit::{Rate, ShapingLimit};
use std::path::Path;

pub const DNCTL: &str = "/usr/sbin/dnctl";
pub const PFCTL: &str = "/sbin/pfctl";
const DEFAULT_PF_CONF: &str = "/etc/pf.conf";

/// Pipe carrying inbound traffic (and all traffic in single mode)
pub const DOWNLOAD_PIPE: u32 = 1;
/// Pipe carrying outbound traffic in split mode
pub const UPLOAD_PIPE: u32 = 2;

/// Render Kbps the way dnctl expects it (e.g., "10Mbit/s", "512Kbit/s")
pub fn render_bandwidth(rate: Rate) -> String {
    let kbps = rate.kbps();
    if kbps >= 1000 {
        format!("{}Mbit/s", kbps / 1000)
    } else {
        format!("{}Kbit/s", kbps)
    }
}

/// macOS dummynet backend
#[derive(Debug, Default)]
pub struct Dummynet;

impl Dummynet {
    pub fn new() -> Self {
        Self
    }

    /// (pipe number, rate) pairs needed for a limit
    fn pipes(limit: &ShapingLimit) -> Vec<(u32, Rate)> {
        match *limit {
            ShapingLimit::Single(rate) => vec![(DOWNLOAD_PIPE, rate)],
            ShapingLimit::Split { download, upload } => {
                vec![(DOWNLOAD_PIPE, download), (UPLOAD_PIPE, upload)]
            }
        }
    }

    fn configure_pipe(pipe: u32, rate: Rate) -> Invocation {
        Invocation::new(format!(
            "{} pipe {} config bw {}",
            DNCTL,
            pipe,
            render_bandwidth(rate)
        ))
    }

    /// Generate PF dummynet rules binding directions to pipes
    fn rules(limit: &ShapingLimit) -> Vec<String> {
        let out_pipe = if limit.is_split() {
            UPLOAD_PIPE
        } else {
            DOWNLOAD_PIPE
        };
        vec![
            format!(
                "dummynet in proto {{ tcp, udp }} from any to any pipe {}",
                DOWNLOAD_PIPE
            ),
            format!(
                "dummynet out proto {{ tcp, udp }} from any to any pipe {}",
                out_pipe
            ),
        ]
    }

    /// Load rules through pfctl's stdin (one rule per line)
    fn load_rules(rules: &[String]) -> Invocation {
        let quoted: Vec<String> = rules.iter().map(|r| shell_quote(r)).collect();
        Invocation::new(format!(
            "printf '%s\\n' {} | {} -f -",
            quoted.join(" "),
            PFCTL
        ))
    }

    fn flush_pipes() -> Invocation {
        Invocation::new(format!("{} -q flush", DNCTL))
    }
}

impl ShapingBackend for Dummynet {
    fn name(&self) -> &'static str {
        "dummynet"
    }

    fn priority(&self) -> BackendPriority {
        BackendPriority::Best
    }

    fn is_available() -> bool {
        Path::new(DNCTL).exists() && Path::new(PFCTL).exists()
    }

    fn setup(&self, limit: &ShapingLimit) -> Vec<Invocation> {
        let mut invocations: Vec<Invocation> = Self::pipes(limit)
            .into_iter()
            .map(|(pipe, rate)| Self::configure_pipe(pipe, rate))
            .collect();
        invocations.push(Self::load_rules(&Self::rules(limit)));
        // pfctl -e fails when PF is already enabled, which is fine
        invocations.push(Invocation::new(format!("{} -e 2>/dev/null || true", PFCTL)));
        invocations
    }

    fn update(&self, previous: &ShapingLimit, next: &ShapingLimit) -> Vec<Invocation> {
        let mut invocations = Vec::new();

        if previous.is_split() != next.is_split() {
            // Drop the stale pipe set before rebinding directions
            invocations.push(Self::flush_pipes());
        }

        invocations.extend(
            Self::pipes(next)
                .into_iter()
                .map(|(pipe, rate)| Self::configure_pipe(pipe, rate)),
        );

        // The helper may have skipped the update that last changed the
        // layout, so the bindings for `next` are always reloaded
        invocations.push(Self::load_rules(&Self::rules(next)));

        invocations
    }

    fn teardown(&self) -> Vec<Invocation> {
        vec![
            Invocation::new(format!(
                "{} -f {} 2>/dev/null || true",
                PFCTL, DEFAULT_PF_CONF
            )),
            Self::flush_pipes(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(kbps: u64) -> Rate {
        Rate::new(kbps).unwrap()
    }

    fn lines(invocations: &[Invocation]) -> Vec<&str> {
        invocations.iter().map(Invocation::as_str).collect()
    }

    #[test]
    fn test_render_bandwidth() {
        assert_eq!(render_bandwidth(rate(999)), "999Kbit/s");
        assert_eq!(render_bandwidth(rate(1000)), "1Mbit/s");
        assert_eq!(render_bandwidth(rate(10_000)), "10Mbit/s");
        // Whole megabits only
        assert_eq!(render_bandwidth(rate(1500)), "1Mbit/s");
        assert_eq!(render_bandwidth(rate(1_000_000)), "1000Mbit/s");
    }

    #[test]
    fn test_split_setup_uses_two_pipes_bound_to_directions() {
        let limit = ShapingLimit::Split {
            download: rate(10_000),
            upload: rate(5_000),
        };
        let setup = Dummynet::new().setup(&limit);
        let lines = lines(&setup);

        assert_eq!(lines[0], "/usr/sbin/dnctl pipe 1 config bw 10Mbit/s");
        assert_eq!(lines[1], "/usr/sbin/dnctl pipe 2 config bw 5Mbit/s");
        assert!(lines[2].contains("'dummynet in proto { tcp, udp } from any to any pipe 1'"));
        assert!(lines[2].contains("'dummynet out proto { tcp, udp } from any to any pipe 2'"));
        assert!(lines[2].ends_with("| /sbin/pfctl -f -"));
        assert_eq!(lines[3], "/sbin/pfctl -e 2>/dev/null || true");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_single_setup_routes_both_directions_through_one_pipe() {
        let setup = Dummynet::new().setup(&ShapingLimit::Single(rate(512)));
        let lines = lines(&setup);

        assert_eq!(lines[0], "/usr/sbin/dnctl pipe 1 config bw 512Kbit/s");
        assert!(lines[1].contains("dummynet in proto { tcp, udp } from any to any pipe 1"));
        assert!(lines[1].contains("dummynet out proto { tcp, udp } from any to any pipe 1"));
        assert!(!lines.iter().any(|l| l.contains("pipe 2")));
    }

    #[test]
    fn test_update_same_layout_keeps_pipes_and_reloads_rules() {
        let backend = Dummynet::new();
        let update = backend.update(
            &ShapingLimit::Single(rate(500)),
            &ShapingLimit::Single(rate(2000)),
        );
        let lines = lines(&update);
        assert_eq!(lines[0], "/usr/sbin/dnctl pipe 1 config bw 2Mbit/s");
        assert!(lines[1].contains("dummynet out proto { tcp, udp } from any to any pipe 1"));
        assert!(lines[1].ends_with("| /sbin/pfctl -f -"));
        assert_eq!(lines.len(), 2);
        assert!(!lines.iter().any(|l| l.contains("flush")));
    }

    #[test]
    fn test_update_layout_change_rebinds_rules() {
        let backend = Dummynet::new();
        let update = backend.update(
            &ShapingLimit::Single(rate(500)),
            &ShapingLimit::Split {
                download: rate(2000),
                upload: rate(300),
            },
        );
        let lines = lines(&update);
        assert_eq!(lines[0], "/usr/sbin/dnctl -q flush");
        assert_eq!(lines[1], "/usr/sbin/dnctl pipe 1 config bw 2Mbit/s");
        assert_eq!(lines[2], "/usr/sbin/dnctl pipe 2 config bw 300Kbit/s");
        assert!(lines[3].contains("pfctl -f -"));
    }

    #[test]
    fn test_split_to_split_update_still_binds_upload_pipe() {
        // Applied on its own (the single -> split update was overwritten),
        // this must still route outbound traffic through pipe 2
        let backend = Dummynet::new();
        let update = backend.update(
            &ShapingLimit::Split {
                download: rate(2000),
                upload: rate(300),
            },
            &ShapingLimit::Split {
                download: rate(3000),
                upload: rate(400),
            },
        );
        let lines = lines(&update);
        assert_eq!(lines[0], "/usr/sbin/dnctl pipe 1 config bw 3Mbit/s");
        assert_eq!(lines[1], "/usr/sbin/dnctl pipe 2 config bw 400Kbit/s");
        assert!(lines[2].contains("'dummynet out proto { tcp, udp } from any to any pipe 2'"));
        assert!(lines[2].ends_with("| /sbin/pfctl -f -"));
    }

    #[test]
    fn test_teardown_restores_defaults_and_flushes() {
        let teardown = Dummynet::new().teardown();
        assert_eq!(
            lines(&teardown),
            vec![
                "/sbin/pfctl -f /etc/pf.conf 2>/dev/null || true",
                "/usr/sbin/dnctl -q flush",
            ]
        );
    }
}
