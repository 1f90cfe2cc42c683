//! Free TCP port selection.

use std::io;
use std::net::{Ipv4Addr, TcpListener};

pub struct PortSelector;

impl PortSelector {
    /// `preferred` when it can be bound on localhost, otherwise a port the OS
    /// assigns. A preferred port of 0 always asks the OS.
    pub fn free_port(preferred: u16) -> io::Result<u16> {
        if preferred != 0 && Self::is_free(preferred) {
            return Ok(preferred);
        }
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        Ok(listener.local_addr()?.port())
    }

    pub fn is_free(port: u16) -> bool {
        TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
    }
}
