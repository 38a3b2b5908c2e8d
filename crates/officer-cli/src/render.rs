//! Plain-text rendering for the console

use officer_core::{PortProbe, StatusSnapshot, TunnelStatus, TunnelStatusView};
use std::fmt;

const RULE_WIDTH: usize = 76;

/// ANSI sequence that clears the terminal and homes the cursor
pub const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

pub fn banner() -> String {
    let title = format!(
        " Tunnel Officer - SSH Tunnel Manager v{}",
        env!("CARGO_PKG_VERSION")
    );
    format!(
        "╔{rule}╗\n║{title:<width$}║\n╚{rule}╝\n",
        rule = "═".repeat(RULE_WIDTH),
        title = title,
        width = RULE_WIDTH,
    )
}

pub const COMMANDS_HINT: &str = "=== Interactive Command Mode ===\n\
Commands: status, start [name], stop [name], reset <name>, add, test [name], watch, quit, help\n";

pub const HELP: &str = "
📋 Available Commands:
  status       - Show tunnel status (default)
  start        - Start all tunnels
  start <name> - Start specific tunnel
  stop         - Stop all tunnels
  stop <name>  - Stop specific tunnel
  reset <name> - Restart specific tunnel with a cleared restart counter
  add          - Add new tunnel interactively
  test [name]  - Check that local tunnel ports accept connections
  watch        - Live status updates (refresh every 2s, Enter to leave)
  quit         - Exit program
  help         - Show this help

💡 Examples:
  start db-prod   # Start specific tunnel
  stop web-dev    # Stop specific tunnel
  reset api-test  # Restart tunnel with reset counter
";

/// Full status board: header, one block per tunnel, summary box
pub struct StatusBoard<'a>(pub &'a StatusSnapshot);

impl fmt::Display for StatusBoard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.0;
        writeln!(
            f,
            "Live Status [{}] | Tunnels: {}\n",
            snapshot.taken_at.format("%Y-%m-%d %H:%M:%S"),
            snapshot.total()
        )?;

        for tunnel in &snapshot.tunnels {
            write!(f, "{}", TunnelBlock(tunnel))?;
        }

        let summary = format!(
            " Running: {}  Errors: {}  Total: {} tunnels",
            snapshot.count(TunnelStatus::Running),
            snapshot.failing(),
            snapshot.total()
        );
        writeln!(f, "┌─ Summary {}┐", "─".repeat(RULE_WIDTH - 10))?;
        writeln!(f, "│{:<width$}│", summary, width = RULE_WIDTH)?;
        writeln!(f, "└{}┘", "─".repeat(RULE_WIDTH))
    }
}

struct TunnelBlock<'a>(&'a TunnelStatusView);

impl fmt::Display for TunnelBlock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.0;
        writeln!(
            f,
            "{} {} {}@{}:{}  {}  ({})",
            t.status.symbol(),
            t.name,
            t.user,
            t.host,
            t.port,
            t.endpoints,
            t.direction
        )?;
        write!(
            f,
            "   Status: {} | Restarts: {} | Delay: {}s",
            t.status.label(),
            t.restart_count,
            t.reconnect_delay
        )?;
        if let Some(seconds) = t.since_last_restart {
            write!(f, " | Last: {}s ago", seconds)?;
        }
        writeln!(f, "\n")
    }
}

/// One line of `test` output
pub struct ProbeLine<'a> {
    pub name: &'a str,
    pub port: u16,
    pub probe: &'a PortProbe,
}

impl fmt::Display for ProbeLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.probe {
            PortProbe::Reachable { latency } => write!(
                f,
                "✅ {} localhost:{} reachable ({} ms)",
                self.name,
                self.port,
                latency.as_millis()
            ),
            PortProbe::Refused { reason } => write!(
                f,
                "❌ {} localhost:{} unreachable: {}",
                self.name, self.port, reason
            ),
            PortProbe::TimedOut => write!(
                f,
                "⏱️  {} localhost:{} timed out",
                self.name, self.port
            ),
        }
    }
}
