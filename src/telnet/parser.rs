// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming IAC state machine (spec §4.2). Grounded on the pack's telnet
//! reference crates for the byte-escaping shape, generalized to also split
//! out GMCP subnegotiation as structured messages rather than leaving them
//! inline in the text stream.

use super::options::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Text,
    Iac,
    Negotiation { cmd: u8 },
    Subneg,
    SubnegIac,
}

/// A `(cmd, opt)` negotiation event, to be handed to the negotiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiation {
    pub cmd: u8,
    pub opt: u8,
}

/// A completed subnegotiation, to be handed to the negotiator.
#[derive(Debug, Clone)]
pub struct Subneg {
    pub opt: u8,
    pub buffer: Vec<u8>,
}

/// A GMCP message extracted from a `GMCP` subnegotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GmcpMessage {
    pub package: String,
    pub data: Option<String>,
}

/// Result of one `process()` call.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub text: Vec<u8>,
    pub gmcp_messages: Vec<GmcpMessage>,
}

/// Streaming telnet IAC parser. Holds state across `process()` calls so a
/// split IAC sequence (e.g. `IAC` at the end of one TCP read, the command
/// byte at the start of the next) is handled correctly.
///
/// This type only parses; it does not decide how to respond to a
/// negotiation or subnegotiation. The caller (see `negotiate`) drives a
/// [`super::negotiate::Negotiator`] with the `negotiations`/`subnegs`
/// collected on each call.
#[derive(Debug)]
pub struct TelnetParser {
    mode: Mode,
    subneg_option: u8,
    subneg_buffer: Vec<u8>,
    /// Negotiation events observed during the most recent `process()` call.
    negotiations: Vec<Negotiation>,
    /// Completed subnegotiations observed during the most recent `process()` call.
    subnegs: Vec<Subneg>,
}

impl Default for TelnetParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TelnetParser {
    pub fn new() -> Self {
        Self {
            mode: Mode::Text,
            subneg_option: 0,
            subneg_buffer: Vec::new(),
            negotiations: Vec::new(),
            subnegs: Vec::new(),
        }
    }

    /// Consume one chunk of raw MUD bytes. Never errors: malformed or
    /// truncated sequences simply fall back to `Mode::Text`.
    ///
    /// Returns the clean text bytes plus any GMCP messages extracted from
    /// `GMCP` subnegotiations seen in this chunk. Negotiation/subnegotiation
    /// events that require a wire response are drained via
    /// [`Self::take_negotiations`] / [`Self::take_subnegs`] for the
    /// negotiator to act on.
    pub fn process(&mut self, bytes: &[u8]) -> ProcessOutput {
        let mut out = ProcessOutput::default();

        for &b in bytes {
            match self.mode {
                Mode::Text => {
                    if b == IAC {
                        self.mode = Mode::Iac;
                    } else {
                        out.text.push(b);
                    }
                }
                Mode::Iac => match b {
                    IAC => {
                        out.text.push(IAC);
                        self.mode = Mode::Text;
                    }
                    cmd if is_bare_command(cmd) => {
                        self.mode = Mode::Text;
                    }
                    WILL | WONT | DO | DONT => {
                        self.mode = Mode::Negotiation { cmd: b };
                    }
                    SB => {
                        self.mode = Mode::Negotiation { cmd: SB };
                    }
                    _ => {
                        self.mode = Mode::Text;
                    }
                },
                Mode::Negotiation { cmd } => {
                    if cmd == SB {
                        self.subneg_option = b;
                        self.subneg_buffer.clear();
                        self.mode = Mode::Subneg;
                    } else {
                        self.negotiations.push(Negotiation { cmd, opt: b });
                        self.mode = Mode::Text;
                    }
                }
                Mode::Subneg => {
                    if b == IAC {
                        self.mode = Mode::SubnegIac;
                    } else {
                        self.subneg_buffer.push(b);
                    }
                }
                Mode::SubnegIac => match b {
                    SE => {
                        let subneg = Subneg { opt: self.subneg_option, buffer: std::mem::take(&mut self.subneg_buffer) };
                        if subneg.opt == OPT_GMCP {
                            out.gmcp_messages.push(split_gmcp(&subneg.buffer));
                        }
                        self.subnegs.push(subneg);
                        self.mode = Mode::Text;
                    }
                    IAC => {
                        self.subneg_buffer.push(IAC);
                        self.mode = Mode::Subneg;
                    }
                    _ => {
                        // Malformed: tolerate by falling back to TEXT.
                        self.mode = Mode::Text;
                    }
                },
            }
        }

        out
    }

    /// Push the next TTYPE value onto nothing — queue lives in the
    /// negotiator, since it needs config (client name) this parser doesn't
    /// have. Drain the negotiation/subnegotiation events this parser
    /// collected so the negotiator can act on them.
    pub fn take_negotiations(&mut self) -> Vec<Negotiation> {
        std::mem::take(&mut self.negotiations)
    }

    pub fn take_subnegs(&mut self) -> Vec<Subneg> {
        std::mem::take(&mut self.subnegs)
    }
}

/// Split a GMCP subnegotiation payload on the first space into
/// `(package, data)`. `data` is absent if there is no space.
fn split_gmcp(buffer: &[u8]) -> GmcpMessage {
    let text = String::from_utf8_lossy(buffer);
    match text.find(' ') {
        Some(idx) => GmcpMessage {
            package: text[..idx].to_owned(),
            data: Some(text[idx + 1..].to_owned()),
        },
        None => GmcpMessage { package: text.into_owned(), data: None },
    }
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
