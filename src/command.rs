// Wire format of commands written to the command channel
//
// Terminate is the literal sentinel `EXIT`. A reconfigure command is one shell
// line per backend invocation, optionally preceded by a `#seq:<n>` shell
// comment so an acknowledging helper can say which command it applied.

use crate::backends::shaping::Invocation;

pub const TERMINATE_SENTINEL: &str = "EXIT";
const SEQ_HEADER: &str = "#seq:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Reconfigure {
        seq: Option<u64>,
        invocations: Vec<Invocation>,
    },
    Terminate,
}

impl Command {
    pub fn reconfigure(seq: u64, invocations: Vec<Invocation>) -> Self {
        Command::Reconfigure {
            seq: Some(seq),
            invocations,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Command::Terminate => TERMINATE_SENTINEL.to_string(),
            Command::Reconfigure { seq, invocations } => {
                let mut lines = Vec::with_capacity(invocations.len() + 1);
                if let Some(seq) = seq {
                    lines.push(format!("{}{}", SEQ_HEADER, seq));
                }
                lines.extend(invocations.iter().map(|i| i.as_str().to_string()));
                lines.join("\n")
            }
        }
    }

    /// Interpret a drained channel value; `None` for blank input
    pub fn decode(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw == TERMINATE_SENTINEL {
            return Some(Command::Terminate);
        }

        let mut seq = None;
        let mut invocations = Vec::new();
        for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(n) = line.strip_prefix(SEQ_HEADER) {
                seq = n.trim().parse().ok();
            } else {
                invocations.push(Invocation::new(line));
            }
        }

        Some(Command::Reconfigure { seq, invocations })
    }
}
