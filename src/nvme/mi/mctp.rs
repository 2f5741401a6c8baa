// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */

//! NVMe-MI message binding for MCTP request channels.
//!
//! Carries the MCTP message type byte and the trailing Message Integrity
//! Check so the engine above deals only in MI message bytes.

use heapless::Vec;
use log::debug;
use mctp::{MCTP_TYPE_NVME, MsgIC, ReqChannel};

use crate::Transport;

const ISCSI: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISCSI);

// MCTP NVMe message type with the integrity check bit; the MIC digest is
// seeded with this byte even though the channel carries it out of band.
const MSGTYPE_IC: u8 = 0x80 | 0x04;
const MIC_LEN: usize = 4;

// Message header, command header, payload, integrity check value
const MAX_FRAGMENTS: usize = 4;

/// [`Transport`] over a blocking MCTP request channel.
pub struct MctpTransport<C: ReqChannel> {
    chan: C,
    mms: usize,
}

impl<C: ReqChannel> MctpTransport<C> {
    /// Bind `chan`, with `mms` the largest MCTP message the peer path
    /// supports in bytes, type byte and integrity check included.
    pub fn new(chan: C, mms: usize) -> Self {
        Self { chan, mms }
    }

    /// Endpoint ID of the remote peer.
    pub fn eid(&self) -> mctp::Eid {
        self.chan.remote_eid()
    }
}

impl<C: ReqChannel> Transport for MctpTransport<C> {
    fn max_message_size(&self) -> usize {
        self.mms.saturating_sub(1 + MIC_LEN)
    }

    fn send_vectored(&mut self, bufs: &[&[u8]]) -> mctp::Result<()> {
        let mut digest = ISCSI.digest();
        digest.update(&[MSGTYPE_IC]);
        for buf in bufs {
            digest.update(buf);
        }
        let icv = digest.finalize().to_le_bytes();

        let mut gathered =
            Vec::<&[u8], MAX_FRAGMENTS>::from_slice(bufs).map_err(|_| mctp::Error::NoSpace)?;
        gathered
            .push(icv.as_slice())
            .map_err(|_| mctp::Error::NoSpace)?;

        self.chan
            .send_vectored(MCTP_TYPE_NVME, MsgIC(true), gathered.as_slice())
    }

    fn recv<'f>(&mut self, buf: &'f mut [u8]) -> mctp::Result<&'f [u8]> {
        let (typ, ic, msg) = self.chan.recv(buf)?;
        if typ.0 != MCTP_TYPE_NVME.0 || !ic.0 {
            debug!("Reply was not an integrity-checked NVMe-MI message: type {typ}");
            return Err(mctp::Error::InvalidInput);
        }
        let msg: &'f [u8] = msg;

        if msg.len() < MIC_LEN {
            debug!("Reply too short to carry an integrity check");
            return Err(mctp::Error::InvalidInput);
        }
        let (msg, icv) = msg.split_at(msg.len() - MIC_LEN);

        let mut digest = ISCSI.digest();
        digest.update(&[MSGTYPE_IC]);
        digest.update(msg);
        let calculated = digest.finalize().to_le_bytes();
        if icv != calculated {
            debug!("Integrity check mismatch: {icv:02x?}, {calculated:02x?}");
            return Err(mctp::Error::InvalidInput);
        }

        Ok(msg)
    }
}
