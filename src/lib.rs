// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */
#![no_std]

//! Requester-side NVMe Management Interface (NVMe-MI) messaging over an
//! out-of-band transport, typically MCTP. An [`nvme::mi::Endpoint`] frames
//! MI and Admin commands for a remote subsystem, addresses the controllers
//! behind it, and reassembles responses whose payloads exceed the
//! transport's per-message limit.

pub mod nvme;
mod wire;

extern crate deku;
extern crate num_derive;

use deku::writer::Writer;
use deku::{DekuError, DekuWriter, no_std_io};

/// Most controller handles an endpoint tracks at once.
pub const MAX_CONTROLLERS: usize = 32;

/// Access the discriminant of a primitive-repr enum as its wire value.
///
/// # Safety
///
/// `Self` must be an enum whose `repr` matches `T`.
pub unsafe trait Discriminant<T: Copy> {
    fn id(&self) -> T
    where
        Self: Sized,
    {
        // SAFETY: primitive-repr enums lay out the discriminant first
        unsafe { *(self as *const Self as *const T) }
    }
}

/// Encode a wire structure into a fixed buffer of at most `N` bytes.
pub(crate) trait Encode<const N: usize>: DekuWriter<()> {
    fn encode(&self) -> Result<([u8; N], usize), DekuError> {
        let mut buf = [0u8; N];
        let mut cursor = no_std_io::Cursor::new(buf.as_mut_slice());
        let mut writer = Writer::new(&mut cursor);
        self.to_writer(&mut writer, ())?;
        writer.finalize()?;
        let len = writer.bits_written / 8;
        Ok((buf, len))
    }
}

/// Synchronous transport carrying NVMe-MI messages to one remote endpoint.
///
/// Messages are framed from the NMP byte onwards; bindings own the MCTP
/// message type byte and any integrity trailer. One `send_vectored` and the
/// following `recv` form a single blocking exchange; timeouts and retry
/// policy belong to the binding.
pub trait Transport {
    /// Largest MI message this binding carries in a single exchange.
    fn max_message_size(&self) -> usize;

    /// Send one request message, gathered from `bufs`.
    fn send_vectored(&mut self, bufs: &[&[u8]]) -> mctp::Result<()>;

    /// Receive one response message into `buf`, returning the filled prefix.
    fn recv<'f>(&mut self, buf: &'f mut [u8]) -> mctp::Result<&'f [u8]>;
}

/// Local decode failures for a received message.
///
/// These never reflect device state; the exchange completed but the reply
/// could not be understood.
#[derive(Debug)]
pub enum FormatError {
    /// Buffer ended before the fixed header was complete, or a field held
    /// an unrepresentable value.
    Codec(DekuError),
    /// Reply did not have the response flag set.
    NotAResponse,
    /// Reply message type did not match the request.
    MessageType { want: u8, got: u8 },
    /// Reply payload exceeded the length the request asked for.
    Length { max: usize, got: usize },
}

/// Failures reported by, or attributed to, the device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommandError {
    /// Raw NVMe-MI response status, exposed untranslated.
    Status(u8),
    /// Response carried fewer payload bytes than the command requested.
    Truncated { want: usize, got: usize },
}

/// Caller-supplied values rejected before any wire traffic.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArgumentError {
    /// Length exceeds the protocol ceiling for a single command.
    TooLarge,
    /// Length or offset is not a whole number of dwords.
    Unaligned,
    /// Payload does not fit the endpoint's per-message transfer window.
    Window,
    /// The endpoint's controller registry is full.
    Capacity,
}

/// Failure modes for NVMe-MI operations.
#[derive(Debug)]
pub enum Error {
    /// Reply was received but malformed; always local, never device state.
    Format(FormatError),
    /// Device rejected or violated the contract of the command.
    Command(CommandError),
    /// The exchange itself failed at the transport boundary.
    Transport(mctp::Error),
    /// Request rejected before any wire traffic.
    Argument(ArgumentError),
    /// Operation through a closed endpoint or controller handle.
    Stale,
}

impl From<FormatError> for Error {
    fn from(err: FormatError) -> Self {
        Self::Format(err)
    }
}

impl From<DekuError> for Error {
    fn from(err: DekuError) -> Self {
        Self::Format(FormatError::Codec(err))
    }
}

impl From<CommandError> for Error {
    fn from(err: CommandError) -> Self {
        Self::Command(err)
    }
}

impl From<mctp::Error> for Error {
    fn from(err: mctp::Error) -> Self {
        Self::Transport(err)
    }
}

impl From<ArgumentError> for Error {
    fn from(err: ArgumentError) -> Self {
        Self::Argument(err)
    }
}
