// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */
#![allow(dead_code)]

extern crate simplelog;

use std::cell::Cell;
use std::rc::Rc;

use log::LevelFilter;
use nvme_mi_host::Transport;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

pub fn setup() {
    let _ = TermLogger::init(
        LevelFilter::Debug,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
}

/// Message size giving the protocol-maximum 4 KiB transfer window.
pub const FULL_WINDOW_MMS: usize = 3 + 64 + 4096;

/// One scripted exchange: the request message the endpoint must emit and
/// the response message to hand back.
pub type Exchange = (Vec<u8>, Vec<u8>);

/// Transport that asserts each outgoing message byte-for-byte and replies
/// from a script, counting completed sends.
pub struct ScriptedTransport {
    exchanges: Vec<Exchange>,
    cursor: usize,
    mms: usize,
    sent: Rc<Cell<usize>>,
}

impl ScriptedTransport {
    pub fn new(exchanges: Vec<Exchange>) -> Self {
        Self {
            exchanges,
            cursor: 0,
            mms: FULL_WINDOW_MMS,
            sent: Rc::new(Cell::new(0)),
        }
    }

    pub fn with_mms(mut self, mms: usize) -> Self {
        self.mms = mms;
        self
    }

    /// Shared count of requests sent, for asserting exchange totals after
    /// the endpoint has consumed the transport.
    pub fn counter(&self) -> Rc<Cell<usize>> {
        self.sent.clone()
    }
}

impl Transport for ScriptedTransport {
    fn max_message_size(&self) -> usize {
        self.mms
    }

    fn send_vectored(&mut self, bufs: &[&[u8]]) -> mctp::Result<()> {
        let flat: Vec<u8> = bufs.iter().flat_map(|b| b.iter()).copied().collect();
        let Some((expect, _)) = self.exchanges.get(self.cursor) else {
            panic!("Unscripted exchange {}: {flat:02x?}", self.cursor);
        };
        assert_eq!(
            &flat, expect,
            "Request mismatch at exchange {}",
            self.cursor
        );
        self.sent.set(self.sent.get() + 1);
        Ok(())
    }

    fn recv<'f>(&mut self, buf: &'f mut [u8]) -> mctp::Result<&'f [u8]> {
        let (_, resp) = &self.exchanges[self.cursor];
        self.cursor += 1;
        let dst = buf.get_mut(..resp.len()).ok_or(mctp::Error::NoSpace)?;
        dst.copy_from_slice(resp);
        Ok(dst)
    }
}

/// Transport that must never be reached; argument errors are required to
/// fail before any wire traffic.
pub struct NeverTransport {
    msg: &'static str,
}

impl NeverTransport {
    pub fn new(msg: &'static str) -> Self {
        NeverTransport { msg }
    }
}

impl Transport for NeverTransport {
    fn max_message_size(&self) -> usize {
        FULL_WINDOW_MMS
    }

    fn send_vectored(&mut self, _bufs: &[&[u8]]) -> mctp::Result<()> {
        unreachable!("{}", self.msg);
    }

    fn recv<'f>(&mut self, _buf: &'f mut [u8]) -> mctp::Result<&'f [u8]> {
        unreachable!("{}", self.msg);
    }
}

/// Transport whose exchanges time out.
pub struct TimeoutTransport {
    pub on_send: bool,
}

impl Transport for TimeoutTransport {
    fn max_message_size(&self) -> usize {
        FULL_WINDOW_MMS
    }

    fn send_vectored(&mut self, _bufs: &[&[u8]]) -> mctp::Result<()> {
        if self.on_send {
            return Err(mctp::Error::TimedOut);
        }
        Ok(())
    }

    fn recv<'f>(&mut self, _buf: &'f mut [u8]) -> mctp::Result<&'f [u8]> {
        Err(mctp::Error::TimedOut)
    }
}

/// Admin request fields that vary across the tests; everything else in
/// the fixed 64-byte region is zero.
#[derive(Default)]
pub struct AdminReq {
    pub opcode: u8,
    pub ctlid: u16,
    pub cdw1: u32,
    pub dofst: u32,
    pub dlen: u32,
    pub cdw10: u32,
    pub cdw11: u32,
    pub cdw12: u32,
    pub cdw13: u32,
    pub cdw14: u32,
}

/// Hand-packed Admin request message, independent of the library codec.
pub fn admin_req_bytes(r: &AdminReq) -> Vec<u8> {
    let mut v = vec![0x10, 0x00, 0x00];
    v.push(r.opcode);
    v.push(0x00); // CFLGS
    v.extend_from_slice(&r.ctlid.to_le_bytes());
    v.extend_from_slice(&r.cdw1.to_le_bytes());
    v.extend_from_slice(&[0u8; 16]); // cdw2..cdw5
    v.extend_from_slice(&r.dofst.to_le_bytes());
    v.extend_from_slice(&r.dlen.to_le_bytes());
    v.extend_from_slice(&[0u8; 8]); // reserved
    for dw in [r.cdw10, r.cdw11, r.cdw12, r.cdw13, r.cdw14, 0u32] {
        v.extend_from_slice(&dw.to_le_bytes());
    }
    assert_eq!(v.len(), 3 + 64);
    v
}

/// Hand-packed Admin response message with full completion header.
pub fn admin_rsp_bytes(status: u8, cdw0: u32, cdw1: u32, cdw3: u32, payload: &[u8]) -> Vec<u8> {
    let mut v = vec![0x90, 0x00, 0x00, status, 0x00, 0x00, 0x00];
    for dw in [cdw0, cdw1, cdw3] {
        v.extend_from_slice(&dw.to_le_bytes());
    }
    v.extend_from_slice(payload);
    v
}

/// Short-form Admin error response: status and three reserved bytes only.
pub fn admin_err_bytes(status: u8) -> Vec<u8> {
    vec![0x90, 0x00, 0x00, status, 0x00, 0x00, 0x00]
}
