// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */
use deku::prelude::*;
use heapless::Vec;
use log::debug;

use crate::nvme::{
    AdminCommand, ControllerId, GetLogPageArgs, IDENTIFY_DATA_SIZE, IdentifyArgs,
    SECURITY_DATA_MAX, SecurityReceiveArgs, SecuritySendArgs,
};
use crate::{ArgumentError, CommandError, Discriminant, Encode, Error, FormatError};
use crate::{MAX_CONTROLLERS, Transport};

use super::{
    AdminCommandRequestHeader, AdminCommandResponseHeader, AdminCompletion,
    ConfigurationIdentifier, ControllerInformation, ControllerList, DataStructureType,
    MAX_TRANSFER_SIZE, MessageHeader, MessageType, MiCommand, MiOpcode, NvmSubsystemHealth,
    NvmSubsystemInformation, NvmeMiCommandRequestHeader, NvmeMiCommandResponseHeader,
    PortInformation,
};

// Fixed message sizes from the NMP byte onwards; the MCTP type byte is
// owned by the transport binding.
const MSG_HDR_LEN: usize = 3;
const ADMIN_REQ_HDR_LEN: usize = 64;
const ADMIN_RSP_HDR_LEN: usize = 16;

// Largest response: message header, Admin response header, one full
// transfer window of data, and slack for a binding trailer.
const RSP_BUF_LEN: usize = MSG_HDR_LEN + ADMIN_RSP_HDR_LEN + MAX_TRANSFER_SIZE + 8;

// MI v2.0, 5.7: Read NVMe-MI Data Structure responses are at most 4096
// bytes; the fixed structures are padded to 32.
const DATA_STRUCTURE_LEN: usize = 32;

/// Handle for one NVMe controller reachable through an [`Endpoint`].
///
/// Pure bookkeeping: initialising a controller does not contact the
/// device. The handle is only valid against the endpoint that created it,
/// and only until that endpoint is closed.
#[derive(Debug)]
pub struct Controller {
    id: ControllerId,
    token: u32,
}

impl Controller {
    pub fn id(&self) -> ControllerId {
        self.id
    }
}

struct ControllerEntry {
    token: u32,
    id: ControllerId,
}

/// One addressable remote MI agent.
///
/// Owns the transport handle and the controller handles initialised
/// against it. Exchanges are strictly sequential: every operation takes
/// `&mut self`, so a multi-chunk transfer holds exclusive use of the
/// endpoint for its entire sequence and command N+1 is never issued
/// before command N completes.
pub struct Endpoint<T: Transport> {
    xport: Option<T>,
    xfer_window: usize,
    ctlrs: Vec<ControllerEntry, MAX_CONTROLLERS>,
    next_token: u32,
    rsp: [u8; RSP_BUF_LEN],
}

impl<T: Transport> Endpoint<T> {
    /// Open an endpoint over `xport`.
    ///
    /// The per-exchange transfer window is derived from the transport's
    /// declared message size, clamped to the protocol's 4 KiB ceiling.
    /// Fails if the transport cannot fit a single Admin exchange.
    pub fn new(xport: T) -> Result<Self, Error> {
        let window = xport
            .max_message_size()
            .saturating_sub(MSG_HDR_LEN + ADMIN_REQ_HDR_LEN)
            .min(MAX_TRANSFER_SIZE)
            & !3;
        if window == 0 {
            return Err(ArgumentError::Window.into());
        }
        Ok(Self {
            xport: Some(xport),
            xfer_window: window,
            ctlrs: Vec::new(),
            next_token: 0,
            rsp: [0; RSP_BUF_LEN],
        })
    }

    /// Bytes of command data carried per wire exchange.
    pub fn transfer_window(&self) -> usize {
        self.xfer_window
    }

    /// Apply a discovered transfer window, e.g. from Port Information
    /// MMTUS or a Configuration Get.
    ///
    /// The window must be a non-zero dword multiple that fits both the
    /// protocol ceiling and the transport's message size.
    pub fn set_transfer_window(&mut self, window: usize) -> Result<(), Error> {
        let Some(xport) = self.xport.as_ref() else {
            return Err(Error::Stale);
        };
        if window == 0
            || window & 3 != 0
            || window > MAX_TRANSFER_SIZE
            || window + MSG_HDR_LEN + ADMIN_REQ_HDR_LEN > xport.max_message_size()
        {
            return Err(ArgumentError::Window.into());
        }
        self.xfer_window = window;
        Ok(())
    }

    /// Release the transport handle.
    ///
    /// Every controller handle initialised against this endpoint becomes
    /// stale; subsequent operations on them fail with [`Error::Stale`].
    pub fn close(&mut self) {
        self.ctlrs.clear();
        self.xport = None;
    }

    /// Track a controller behind this endpoint.
    ///
    /// Valid IDs are discovered with [`Endpoint::mi_read_ctrl_list`].
    /// Initialising the same ID twice yields two independent handles; no
    /// uniqueness is enforced, so divergent use of duplicate handles is
    /// the caller's hazard to manage.
    pub fn init_controller(&mut self, id: ControllerId) -> Result<Controller, Error> {
        if self.xport.is_none() {
            return Err(Error::Stale);
        }
        let token = self.next_token;
        self.ctlrs
            .push(ControllerEntry { token, id })
            .map_err(|_| ArgumentError::Capacity)?;
        self.next_token += 1;
        Ok(Controller { id, token })
    }

    /// Release a controller handle, independent of any other handle under
    /// this endpoint.
    pub fn close_controller(&mut self, ctrl: Controller) -> Result<(), Error> {
        let Some(at) = self.ctlrs.iter().position(|e| e.token == ctrl.token) else {
            return Err(Error::Stale);
        };
        self.ctlrs.swap_remove(at);
        Ok(())
    }

    fn check_controller(&self, ctrl: &Controller) -> Result<(), Error> {
        if self.xport.is_none()
            || !self
                .ctlrs
                .iter()
                .any(|e| e.token == ctrl.token && e.id == ctrl.id)
        {
            return Err(Error::Stale);
        }
        Ok(())
    }

    // One wire exchange: send `bufs` gathered, receive into the endpoint
    // buffer, validate the message header against the request type, and
    // return the body that follows it.
    fn submit(&mut self, mt: MessageType, bufs: &[&[u8]]) -> Result<&[u8], Error> {
        let Some(xport) = self.xport.as_mut() else {
            return Err(Error::Stale);
        };
        xport.send_vectored(bufs)?;
        let msg = xport.recv(&mut self.rsp)?;

        let ((body, _), mh) = MessageHeader::from_bytes((msg, 0))?;
        if !mh.ror() {
            debug!("Reply is not a response message: {mh:x?}");
            return Err(FormatError::NotAResponse.into());
        }
        match mh.nmimt() {
            Ok(t) if t == mt => {}
            Ok(t) => {
                debug!("Reply NMIMT {t:?} does not match request {mt:?}");
                return Err(FormatError::MessageType {
                    want: mt.id(),
                    got: t.id(),
                }
                .into());
            }
            Err(raw) => {
                debug!("Reply contains unrecognised NMIMT: {raw:#x}");
                return Err(FormatError::MessageType {
                    want: mt.id(),
                    got: raw,
                }
                .into());
            }
        }
        Ok(body)
    }

    /// Raw Admin transfer: exactly one wire exchange.
    ///
    /// Sends `cmd` with an outbound payload of `req_data`, requesting
    /// `resp_data.len()` bytes of response data starting `resp_offset`
    /// bytes into the command's logical response. Both payloads must be
    /// dword multiples within the protocol ceiling and the endpoint's
    /// transfer window; this primitive never chunks. Returns the
    /// completion dwords and the number of payload bytes received, which
    /// may be less than requested.
    pub fn admin_xfer(
        &mut self,
        ctrl: &Controller,
        cmd: &AdminCommand,
        req_data: &[u8],
        resp_offset: usize,
        resp_data: &mut [u8],
    ) -> Result<(AdminCompletion, usize), Error> {
        self.check_controller(ctrl)?;
        let dofst = u32::try_from(resp_offset).map_err(|_| ArgumentError::TooLarge)?;
        if req_data.len() & 3 != 0 || resp_data.len() & 3 != 0 || resp_offset & 3 != 0 {
            return Err(ArgumentError::Unaligned.into());
        }
        if req_data.len() > MAX_TRANSFER_SIZE || resp_data.len() > MAX_TRANSFER_SIZE {
            return Err(ArgumentError::TooLarge.into());
        }
        if req_data.len() > self.xfer_window || resp_data.len() > self.xfer_window {
            return Err(ArgumentError::Window.into());
        }

        let mh = MessageHeader::request(MessageType::NvmeAdminCommand).encode()?;
        let hdr = AdminCommandRequestHeader {
            opcode: cmd.opcode.id(),
            cflgs: 0,
            ctlid: ctrl.id.0,
            cdw1: cmd.cdw1,
            cdw2: cmd.cdw2,
            cdw3: cmd.cdw3,
            cdw4: cmd.cdw4,
            cdw5: cmd.cdw5,
            dofst,
            dlen: resp_data.len() as u32,
            cdw10: cmd.cdw10,
            cdw11: cmd.cdw11,
            cdw12: cmd.cdw12,
            cdw13: cmd.cdw13,
            cdw14: cmd.cdw14,
            cdw15: cmd.cdw15,
        }
        .encode()?;

        let body = self.submit(MessageType::NvmeAdminCommand, &[&mh.0, &hdr.0, req_data])?;

        // A failed command may carry only the short status form rather
        // than the full response header; peek the status first.
        let ((_, _), sr) = NvmeMiCommandResponseHeader::from_bytes((body, 0))?;
        if sr.status != 0 {
            debug!("Admin command failed with status {:#04x}", sr.status);
            return Err(CommandError::Status(sr.status).into());
        }

        let ((payload, _), rh) = AdminCommandResponseHeader::from_bytes((body, 0))?;
        if payload.len() > resp_data.len() {
            debug!(
                "Response data exceeds requested length: {} > {}",
                payload.len(),
                resp_data.len()
            );
            return Err(FormatError::Length {
                max: resp_data.len(),
                got: payload.len(),
            }
            .into());
        }
        resp_data[..payload.len()].copy_from_slice(payload);

        Ok((
            AdminCompletion {
                cdw0: rh.cqedw0,
                cdw1: rh.cqedw1,
                cdw3: rh.cqedw3,
            },
            payload.len(),
        ))
    }

    /// Raw MI transfer: exactly one wire exchange.
    ///
    /// Returns the three NVMe Management Response bytes and the number of
    /// response data bytes copied into `resp_data`.
    pub fn mi_xfer(
        &mut self,
        cmd: &MiCommand,
        resp_data: &mut [u8],
    ) -> Result<([u8; 3], usize), Error> {
        if self.xport.is_none() {
            return Err(Error::Stale);
        }
        if resp_data.len() > MAX_TRANSFER_SIZE {
            return Err(ArgumentError::TooLarge.into());
        }

        let mh = MessageHeader::request(MessageType::NvmeMiCommand).encode()?;
        let hdr = NvmeMiCommandRequestHeader {
            opcode: cmd.opcode.id(),
            cdw0: cmd.cdw0,
            cdw1: cmd.cdw1,
        }
        .encode()?;

        let body = self.submit(MessageType::NvmeMiCommand, &[&mh.0, &hdr.0])?;

        let ((payload, _), mr) = NvmeMiCommandResponseHeader::from_bytes((body, 0))?;
        if mr.status != 0 {
            debug!("MI command failed with status {:#04x}", mr.status);
            return Err(CommandError::Status(mr.status).into());
        }
        if payload.len() > resp_data.len() {
            debug!(
                "Response data exceeds requested length: {} > {}",
                payload.len(),
                resp_data.len()
            );
            return Err(FormatError::Length {
                max: resp_data.len(),
                got: payload.len(),
            }
            .into());
        }
        resp_data[..payload.len()].copy_from_slice(payload);
        Ok((mr.nmresp, payload.len()))
    }

    // MI v2.0, 5.7, Figure 109: CTRLID, PORTID and DTYP share dword 0.
    // The Response Data Length in NMRESP bounds the returned structure.
    fn mi_read_data(
        &mut self,
        ctrlid: u16,
        portid: u8,
        dtyp: DataStructureType,
        resp_data: &mut [u8],
    ) -> Result<usize, Error> {
        let cmd = MiCommand {
            opcode: MiOpcode::ReadNvmeMiDataStructure,
            cdw0: u32::from(ctrlid) | u32::from(portid) << 16 | u32::from(dtyp.id()) << 24,
            cdw1: 0,
        };
        let (nmresp, len) = self.mi_xfer(&cmd, resp_data)?;
        let rdl = usize::from(u16::from_le_bytes([nmresp[0], nmresp[1]]));
        if rdl > len {
            debug!("RDL {rdl} exceeds the {len} bytes of response data received");
            return Err(CommandError::Truncated { want: rdl, got: len }.into());
        }
        Ok(rdl.min(len))
    }

    /// Read the NVM Subsystem Information data structure.
    pub fn mi_read_subsystem_info(&mut self) -> Result<NvmSubsystemInformation, Error> {
        let mut buf = [0u8; DATA_STRUCTURE_LEN];
        let len = self.mi_read_data(0, 0, DataStructureType::NvmSubsystemInformation, &mut buf)?;
        let ((_, _), info) = NvmSubsystemInformation::from_bytes((&buf[..len], 0))?;
        Ok(info)
    }

    /// Read the Port Information data structure for `portid`.
    ///
    /// The subsystem information NUMP field bounds the valid port IDs.
    pub fn mi_read_port_info(&mut self, portid: u8) -> Result<PortInformation, Error> {
        let mut buf = [0u8; DATA_STRUCTURE_LEN];
        let len = self.mi_read_data(0, portid, DataStructureType::PortInformation, &mut buf)?;
        let ((_, _), info) = PortInformation::from_bytes((&buf[..len], 0))?;
        Ok(info)
    }

    /// Read the Controller List: IDs greater than or equal to `start`.
    pub fn mi_read_ctrl_list(&mut self, start: ControllerId) -> Result<ControllerList, Error> {
        let mut buf = [0u8; MAX_TRANSFER_SIZE];
        let len = self.mi_read_data(start.0, 0, DataStructureType::ControllerList, &mut buf)?;
        let ((_, _), list) = ControllerList::from_bytes((&buf[..len], 0))?;
        Ok(list)
    }

    /// Read the Controller Information data structure for `id`.
    pub fn mi_read_ctrl_info(&mut self, id: ControllerId) -> Result<ControllerInformation, Error> {
        let mut buf = [0u8; DATA_STRUCTURE_LEN];
        let len = self.mi_read_data(id.0, 0, DataStructureType::ControllerInformation, &mut buf)?;
        let ((_, _), info) = ControllerInformation::from_bytes((&buf[..len], 0))?;
        Ok(info)
    }

    /// Poll the NVM Subsystem Health Data Structure.
    ///
    /// `clear` requests that the Composite Controller Status state is
    /// reset once reported.
    pub fn mi_subsystem_health_status_poll(
        &mut self,
        clear: bool,
    ) -> Result<NvmSubsystemHealth, Error> {
        // MI v2.0, 5.6, Figure 106: CS is dword 1 bit 31
        let cmd = MiCommand {
            opcode: MiOpcode::NvmSubsystemHealthStatusPoll,
            cdw0: 0,
            cdw1: u32::from(clear) << 31,
        };
        let mut buf = [0u8; 8];
        let (_, len) = self.mi_xfer(&cmd, &mut buf)?;
        let ((_, _), health) = NvmSubsystemHealth::from_bytes((&buf[..len], 0))?;
        Ok(health)
    }

    /// Read the MCTP Transmission Unit Size configured for `portid`.
    pub fn mi_config_get_mtus(&mut self, portid: u8) -> Result<u16, Error> {
        // MI v2.0, 5.1.3, Figure 78: configuration identifier in dword 0
        // bits 7:0, port identifier in bits 31:24
        let cmd = MiCommand {
            opcode: MiOpcode::ConfigurationGet,
            cdw0: u32::from(ConfigurationIdentifier::MctpTransmissionUnitSize.id())
                | u32::from(portid) << 24,
            cdw1: 0,
        };
        let (nmresp, _) = self.mi_xfer(&cmd, &mut [])?;
        Ok(u16::from_le_bytes([nmresp[0], nmresp[1]]))
    }

    /// Perform an Admin Identify, retrieving part of the response.
    ///
    /// `offset` and `data.len()` select the range of the identify
    /// structure to return. Identify responses are fixed-size, so a
    /// returned length different from the requested length is an error,
    /// not a short read. Returns the completion dword 0 result.
    pub fn admin_identify_partial(
        &mut self,
        ctrl: &Controller,
        args: &IdentifyArgs,
        offset: usize,
        data: &mut [u8],
    ) -> Result<u32, Error> {
        let cmd = args.command();
        let (cqe, got) = self.admin_xfer(ctrl, &cmd, &[], offset, data)?;
        if got != data.len() {
            debug!("Identify returned {got} bytes of {} requested", data.len());
            return Err(CommandError::Truncated {
                want: data.len(),
                got,
            }
            .into());
        }
        Ok(cqe.cdw0)
    }

    /// Perform an Admin Identify for the full 4 KiB structure.
    pub fn admin_identify(
        &mut self,
        ctrl: &Controller,
        args: &IdentifyArgs,
        data: &mut [u8; IDENTIFY_DATA_SIZE],
    ) -> Result<u32, Error> {
        self.admin_identify_partial(ctrl, args, 0, data.as_mut_slice())
    }

    /// Identify the controller `ctrl` addresses.
    pub fn admin_identify_ctrl(
        &mut self,
        ctrl: &Controller,
        data: &mut [u8; IDENTIFY_DATA_SIZE],
    ) -> Result<u32, Error> {
        self.admin_identify(ctrl, &IdentifyArgs::default(), data)
    }

    /// Identify the subsystem's controller list, starting at `start`.
    pub fn admin_identify_ctrl_list(
        &mut self,
        ctrl: &Controller,
        start: ControllerId,
        data: &mut [u8; IDENTIFY_DATA_SIZE],
    ) -> Result<u32, Error> {
        let args = IdentifyArgs {
            cns: crate::nvme::IdentifyCns::NvmSubsystemControllerList,
            cntid: start.0,
            ..IdentifyArgs::default()
        };
        self.admin_identify(ctrl, &args, data)
    }

    /// Retrieve a log page, reassembling it across wire exchanges.
    ///
    /// Issues one raw transfer per `transfer_window` of `data`, advancing
    /// the log page offset as chunks complete, in order, on the calling
    /// thread. A chunk returning fewer bytes than requested aborts the
    /// transfer with [`CommandError::Truncated`]; on any failure the
    /// buffer contents are unspecified and no partial result is exposed.
    pub fn admin_get_log_page(
        &mut self,
        ctrl: &Controller,
        args: &GetLogPageArgs,
        data: &mut [u8],
    ) -> Result<(), Error> {
        if data.len() & 3 != 0 || args.lpo & 3 != 0 {
            return Err(ArgumentError::Unaligned.into());
        }
        let window = self.xfer_window;
        let mut lpo = args.lpo;
        let mut done = 0;
        while done < data.len() {
            let rem = data.len() - done;
            let xfer = rem.min(window);
            // RAE stays asserted until the final chunk; an aborted
            // sequence must not clear event state.
            let rae = args.rae || xfer < rem;
            let cmd = args.chunk(lpo, xfer, rae);
            let (_, got) = self.admin_xfer(ctrl, &cmd, &[], 0, &mut data[done..done + xfer])?;
            if got != xfer {
                debug!("Log page chunk at {lpo} returned {got} bytes of {xfer}");
                return Err(CommandError::Truncated { want: xfer, got }.into());
            }
            done += xfer;
            lpo += xfer as u64;
        }
        Ok(())
    }

    /// Perform a Security Send with `data` as the protocol payload.
    ///
    /// Payloads above the 4 KiB specification limit are rejected before
    /// any wire traffic; Security Send is never chunked.
    pub fn admin_security_send(
        &mut self,
        ctrl: &Controller,
        args: &SecuritySendArgs,
        data: &[u8],
    ) -> Result<(), Error> {
        if data.len() > SECURITY_DATA_MAX {
            return Err(ArgumentError::TooLarge.into());
        }
        let cmd = args.command(data.len() as u32);
        self.admin_xfer(ctrl, &cmd, data, 0, &mut [])?;
        Ok(())
    }

    /// Perform a Security Receive into `data`, returning the transferred
    /// length.
    ///
    /// Subject to the same 4 KiB limit as Security Send and likewise
    /// never chunked. Unlike Identify, a response shorter than `data` is
    /// legitimate.
    pub fn admin_security_recv(
        &mut self,
        ctrl: &Controller,
        args: &SecurityReceiveArgs,
        data: &mut [u8],
    ) -> Result<usize, Error> {
        if data.len() > SECURITY_DATA_MAX {
            return Err(ArgumentError::TooLarge.into());
        }
        let cmd = args.command(data.len() as u32);
        let (_, got) = self.admin_xfer(ctrl, &cmd, &[], 0, data)?;
        Ok(got)
    }
}
