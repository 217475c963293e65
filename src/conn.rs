//! The full-duplex byte stream abstraction the launcher hands the server.
//!
//! The core never opens a socket itself (§6 launcher contract); it only
//! needs to read with a bounded timeout and write. `TcpStream` already
//! has the right shape — `set_read_timeout` takes `&self` — so the
//! blanket impl below just forwards to it.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

pub trait Connection: Read + Write {
    /// `None` disables the timeout (indefinite block). Matches
    /// `TcpStream::set_read_timeout`'s contract, including its
    /// intolerance for `Some(Duration::ZERO)`.
    fn set_read_timeout(&mut self, dur: Option<Duration>) -> std::io::Result<()>;
}

impl Connection for TcpStream {
    fn set_read_timeout(&mut self, dur: Option<Duration>) -> std::io::Result<()> {
        TcpStream::set_read_timeout(self, dur)
    }
}
