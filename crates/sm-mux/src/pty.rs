//! PTY upgrade for raw reverse shells
//!
//! A plain reverse shell has no terminal: no job control, no line editing and
//! no full-screen programs. The upgrade asks the remote side to spawn a shell
//! inside a pseudo-terminal and then sizes it to match the operator's window.

use bytes::Bytes;
use sm_core::config::PtyUpgradeConfig;

/// Fallback when the operator terminal size cannot be read
const DEFAULT_SIZE: (u16, u16) = (80, 24);

/// Commands that turn a raw shell into a PTY of a given size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyUpgrade {
    /// `python`, `python3` or `script`
    pub binary: String,
    /// Shell spawned inside the PTY
    pub shell: String,
    pub rows: u16,
    pub cols: u16,
}

impl PtyUpgrade {
    pub fn new(binary: impl Into<String>, shell: impl Into<String>, rows: u16, cols: u16) -> Self {
        Self {
            binary: binary.into(),
            shell: shell.into(),
            rows,
            cols,
        }
    }

    /// Build from config, sized to the current terminal
    pub fn from_config(config: &PtyUpgradeConfig) -> Self {
        let (cols, rows) = crossterm::terminal::size().unwrap_or(DEFAULT_SIZE);
        Self::new(&config.binary, &config.shell, rows, cols)
    }

    /// The lines to send, in order.
    ///
    /// An unrecognised binary spawns nothing and only resets the terminal.
    pub fn commands(&self) -> Vec<Bytes> {
        let mut commands = Vec::with_capacity(2);

        if self.binary == "script" {
            commands.push(Bytes::from(format!(
                "{} -qc {} /dev/null 2>&1\n",
                self.binary, self.shell
            )));
        } else if self.binary.starts_with("python") {
            commands.push(Bytes::from(format!(
                "{} -c \"import pty; pty.spawn('{}')\" 2>&1\n",
                self.binary, self.shell
            )));
        }

        commands.push(Bytes::from(format!(
            "reset && export SHELL={};export TERM=xterm-256color;stty rows {} columns {};\n",
            self.shell, self.rows, self.cols
        )));
        commands
    }
}
