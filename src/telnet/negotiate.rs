// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-option negotiation response policy (spec §4.2's table). Consumes the
//! `Negotiation`/`Subneg` events a [`super::parser::TelnetParser`] collects
//! and produces the raw bytes to write back to the MUD.

use std::collections::VecDeque;

use super::options::*;
use super::parser::{Negotiation, Subneg};

/// Outbound text encoding for client-origin input (spec §4.3). Starts in
/// `Latin1` (the historical MUD default) and flips to `Utf8` once the MUD
/// accepts our CHARSET offer — this crate's resolution of that spec's open
/// question, since nothing in the negotiation table forces one default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Latin1,
    Utf8,
}

/// Per-session negotiation state: which options are active, the TTYPE
/// rotation queue, and password-mode tracking for ECHO.
#[derive(Debug)]
pub struct Negotiator {
    client_name: String,
    client_version: String,
    ttype_queue: VecDeque<String>,
    password_mode: bool,
    encoding: Encoding,
    window_width: u16,
    window_height: u16,
}

impl Negotiator {
    pub fn new(client_name: impl Into<String>, client_version: impl Into<String>) -> Self {
        let client_name = client_name.into();
        let queue = VecDeque::from([client_name.clone(), "XTERM-256color".to_owned(), "MTTS 141".to_owned()]);
        Self {
            client_name,
            client_version: client_version.into(),
            ttype_queue: queue,
            password_mode: false,
            encoding: Encoding::Latin1,
            window_width: 80,
            window_height: 24,
        }
    }

    pub fn password_mode(&self) -> bool {
        self.password_mode
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Update the window size used for any future `NAWS` response.
    pub fn set_window_size(&mut self, width: u16, height: u16) {
        self.window_width = width;
        self.window_height = height;
    }

    /// Raw `IAC SB NAWS <w> <h> IAC SE` bytes for the current window size,
    /// for sending an out-of-band update (spec §4.8's `naws` client
    /// message) rather than only in response to the MUD's `DO NAWS`.
    pub fn naws_update_bytes(&self) -> Vec<u8> {
        self.naws_subneg()
    }

    /// Handle one `WILL`/`WONT`/`DO`/`DONT` event, returning the raw bytes
    /// (if any) to write back to the MUD.
    pub fn handle_negotiation(&mut self, neg: Negotiation) -> Vec<u8> {
        match (neg.cmd, neg.opt) {
            (DO | WILL, OPT_GMCP) => {
                let mirror = if neg.cmd == DO { WILL } else { DO };
                let mut out = vec![IAC, mirror, OPT_GMCP];
                out.extend(self.gmcp_hello());
                out
            }
            (DO, OPT_TTYPE) => vec![IAC, WILL, OPT_TTYPE],
            (WILL, OPT_MSDP) => {
                let mut out = vec![IAC, DO, OPT_MSDP];
                out.extend(self.msdp_vars());
                out
            }
            (DO | WILL, OPT_MXP) => {
                let mirror = if neg.cmd == DO { WILL } else { DO };
                vec![IAC, mirror, OPT_MXP]
            }
            (DO, OPT_NEW_ENVIRON) => vec![IAC, WILL, OPT_NEW_ENVIRON],
            (WILL, OPT_ECHO) => {
                self.password_mode = true;
                Vec::new()
            }
            (WONT, OPT_ECHO) => {
                self.password_mode = false;
                Vec::new()
            }
            (WILL, OPT_SUPPRESS_GO_AHEAD) => vec![IAC, WONT, OPT_SUPPRESS_GO_AHEAD],
            (DO, OPT_NAWS) => {
                let mut out = vec![IAC, WILL, OPT_NAWS];
                out.extend(self.naws_subneg());
                out
            }
            (WILL, OPT_NAWS) => vec![IAC, WONT, OPT_NAWS],
            (DO, OPT_CHARSET) => vec![IAC, WILL, OPT_CHARSET],
            (WILL, OPT_MCCP2) => {
                // Decline: keep the wire always plaintext rather than pull
                // in a zlib dependency for this one option.
                vec![IAC, DONT, OPT_MCCP2]
            }
            (DO, _) => vec![IAC, WONT, neg.opt],
            (WILL, _) => vec![IAC, DONT, neg.opt],
            (DONT | WONT, _) => Vec::new(),
            _ => Vec::new(),
        }
    }

    /// Handle one completed subnegotiation, returning the raw bytes (if
    /// any) to write back to the MUD. GMCP subnegotiations are not handled
    /// here: they carry application messages, not protocol responses, and
    /// are surfaced to the dispatcher via `ProcessOutput::gmcp_messages`.
    pub fn handle_subneg(&mut self, subneg: Subneg) -> Vec<u8> {
        match subneg.opt {
            OPT_TTYPE => {
                if subneg.buffer.first() == Some(&TTYPE_SEND) {
                    self.next_ttype_response()
                } else {
                    Vec::new()
                }
            }
            OPT_NEW_ENVIRON => {
                if subneg.buffer.first() == Some(&NEW_ENVIRON_SEND) {
                    self.new_environ_response()
                } else {
                    Vec::new()
                }
            }
            OPT_CHARSET => {
                if subneg.buffer.first() == Some(&CHARSET_REQUEST) {
                    self.encoding = Encoding::Utf8;
                    self.charset_accept_response()
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }

    fn next_ttype_response(&mut self) -> Vec<u8> {
        let value = if self.ttype_queue.len() > 1 {
            self.ttype_queue.pop_front().unwrap_or_else(|| self.client_name.clone())
        } else {
            self.ttype_queue.front().cloned().unwrap_or_else(|| self.client_name.clone())
        };
        let mut out = vec![IAC, SB, OPT_TTYPE, TTYPE_IS];
        out.extend(value.into_bytes());
        out.extend([IAC, SE]);
        out
    }

    fn new_environ_response(&self) -> Vec<u8> {
        let mut out = vec![IAC, SB, OPT_NEW_ENVIRON, NEW_ENVIRON_IS, NEW_ENVIRON_VAR];
        out.extend(b"IPADDRESS");
        out.push(NEW_ENVIRON_VALUE);
        out.extend(b"0.0.0.0");
        out.extend([IAC, SE]);
        out
    }

    fn charset_accept_response(&self) -> Vec<u8> {
        let mut out = vec![IAC, SB, OPT_CHARSET, CHARSET_ACCEPTED];
        out.extend(b"UTF-8");
        out.extend([IAC, SE]);
        out
    }

    fn naws_subneg(&self) -> Vec<u8> {
        let mut out = vec![IAC, SB, OPT_NAWS];
        out.extend(self.window_width.to_be_bytes());
        out.extend(self.window_height.to_be_bytes());
        out.extend([IAC, SE]);
        out
    }

    fn gmcp_hello(&self) -> Vec<u8> {
        let data = serde_json::json!({ "client": self.client_name, "version": self.client_version }).to_string();
        let mut out = vec![IAC, SB, OPT_GMCP];
        out.extend(b"Core.Hello ");
        out.extend(data.into_bytes());
        out.extend([IAC, SE]);
        out
    }

    fn msdp_vars(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (var, val) in [
            ("CLIENT_ID", self.client_name.as_str()),
            ("CLIENT_VERSION", self.client_version.as_str()),
            ("XTERM_256_COLORS", "1"),
            ("MXP", "1"),
            ("UTF_8", "1"),
        ] {
            out.extend([IAC, SB, OPT_MSDP]);
            out.push(1); // MSDP_VAR
            out.extend(var.as_bytes());
            out.push(2); // MSDP_VAL
            out.extend(val.as_bytes());
            out.extend([IAC, SE]);
        }
        out
    }
}

#[cfg(test)]
#[path = "negotiate_tests.rs"]
mod tests;
