//! Shared harness: an in-memory operator terminal and remote shells

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use sm_core::config::MuxConfig;
use sm_core::{PeerAddr, SessionId, SmError};
use sm_mux::Multiplexer;
use sm_stream::{BufferedStream, StreamOptions};

/// Upper bound on any single wait in a test
pub const WAIT: Duration = Duration::from_secs(5);

/// The operator's side of the multiplexer's terminal
pub struct Terminal {
    reader: ReadHalf<DuplexStream>,
    writer: Option<WriteHalf<DuplexStream>>,
    seen: Vec<u8>,
}

impl Terminal {
    /// Type a line
    pub async fn send(&mut self, line: &str) {
        let writer = self.writer.as_mut().expect("terminal input closed");
        writer.write_all(line.as_bytes()).await.unwrap();
        writer.flush().await.unwrap();
    }

    /// Close operator input
    pub async fn hang_up(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await.unwrap();
        }
    }

    /// Wait until `needle` has appeared on screen; returns its offset
    pub async fn expect(&mut self, needle: &str) -> usize {
        let needle = needle.as_bytes();
        let result = timeout(WAIT, async {
            loop {
                if let Some(pos) = find(&self.seen, needle) {
                    return pos;
                }
                let mut chunk = [0u8; 1024];
                let n = self.reader.read(&mut chunk).await.unwrap();
                assert!(n > 0, "terminal output ended while waiting");
                self.seen.extend_from_slice(&chunk[..n]);
            }
        })
        .await;

        match result {
            Ok(pos) => pos,
            Err(_) => panic!(
                "timed out waiting for {:?}; screen was {:?}",
                String::from_utf8_lossy(needle),
                String::from_utf8_lossy(&self.seen)
            ),
        }
    }

    /// Wait until `needle` has appeared `times` times
    pub async fn expect_count(&mut self, needle: &str, times: usize) {
        let result = timeout(WAIT, async {
            while self.count(needle) < times {
                let mut chunk = [0u8; 1024];
                let n = self.reader.read(&mut chunk).await.unwrap();
                assert!(n > 0, "terminal output ended while waiting");
                self.seen.extend_from_slice(&chunk[..n]);
            }
        })
        .await;
        assert!(
            result.is_ok(),
            "timed out waiting for {} x {:?}; screen was {:?}",
            times,
            needle,
            self.screen()
        );
    }

    /// Everything shown so far
    pub fn screen(&self) -> String {
        String::from_utf8_lossy(&self.seen).into_owned()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.screen().matches(needle).count()
    }
}

pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// A multiplexer whose operator is an in-memory terminal
pub fn multiplexer(config: &MuxConfig) -> (Multiplexer, Terminal) {
    multiplexer_with_terminal(config, &StreamOptions::default())
}

/// Same as [`multiplexer`] with custom options for the operator stream
pub fn multiplexer_with_terminal(
    config: &MuxConfig,
    terminal_options: &StreamOptions,
) -> (Multiplexer, Terminal) {
    let (mux_side, test_side) = tokio::io::duplex(64 * 1024);
    let operator = BufferedStream::new(mux_side, terminal_options).unwrap();
    let mux = Multiplexer::new(Arc::new(operator), config).unwrap();

    let (reader, writer) = tokio::io::split(test_side);
    let terminal = Terminal {
        reader,
        writer: Some(writer),
        seen: Vec::new(),
    };
    (mux, terminal)
}

/// Start the operator loop
pub fn run(mux: &Multiplexer) -> JoinHandle<Result<(), SmError>> {
    let mux = mux.clone();
    tokio::spawn(async move { mux.run().await })
}

/// Attach an in-memory remote shell; returns the shell's end
pub fn connect_shell(mux: &Multiplexer, port: u16) -> (SessionId, DuplexStream) {
    let (mux_side, shell_side) = tokio::io::duplex(64 * 1024);
    let id = mux
        .on_new_connection(mux_side, PeerAddr::new("10.0.0.1", port))
        .unwrap();
    (id, shell_side)
}

/// Read exactly `expected.len()` bytes from a shell and compare
pub async fn shell_receives(shell: &mut DuplexStream, expected: &[u8]) {
    let mut buf = vec![0u8; expected.len()];
    timeout(WAIT, shell.read_exact(&mut buf))
        .await
        .expect("timed out waiting for shell input")
        .unwrap();
    assert_eq!(buf, expected);
}

/// Poll until `condition` holds
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
