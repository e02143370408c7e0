//! sm-mux: Drive many reverse shell sessions from one terminal
//!
//! Remote shells connect back to (or are dialled by) a [`ListenerManager`].
//! Each becomes a session in the [`Multiplexer`], which shows the active
//! session live, keeps the output of the others for later, and routes the
//! operator's typed lines either to a control command or to the active shell.

pub mod cli;
pub mod command;
pub mod multiplexer;
pub mod operator;
pub mod pty;
pub mod server;
pub mod session;

pub use command::{Command, CommandInterpreter};
pub use multiplexer::{Multiplexer, NOTICE_PREFIX};
pub use pty::PtyUpgrade;
pub use server::ListenerManager;
pub use session::{Connection, SessionRegistry};
