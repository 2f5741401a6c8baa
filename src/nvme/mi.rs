// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */
use deku::ctx::Endian;
use deku::{DekuRead, DekuWrite};
use flagset::{FlagSet, flags};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::nvme::ControllerId;
use crate::wire::{WireFlagSet, WireVec};
use crate::{CommandError, Discriminant, Encode};

pub mod host;
pub mod mctp;

pub use host::{Controller, Endpoint};

// MI v2.0, 6, Figure 136: DOFST/DLEN bound command data to 4 KiB
pub const MAX_TRANSFER_SIZE: usize = 4096;

// MI v2.0, 3.1.1, Figure 20, NMIMT
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    ControlPrimitive = 0x00,
    NvmeMiCommand = 0x01,
    NvmeAdminCommand = 0x02,
    PcieCommand = 0x04,
    AsynchronousEvent = 0x05,
}
unsafe impl Discriminant<u8> for MessageType {}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x00 => Ok(Self::ControlPrimitive),
            0x01 => Ok(Self::NvmeMiCommand),
            0x02 => Ok(Self::NvmeAdminCommand),
            0x04 => Ok(Self::PcieCommand),
            0x05 => Ok(Self::AsynchronousEvent),
            _ => Err(value),
        }
    }
}

// MI v2.0, 3.1.1, Figure 20
#[derive(Debug, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub(crate) struct MessageHeader {
    #[deku(pad_bytes_after = "2")]
    nmimt: u8,
}
impl Encode<3> for MessageHeader {}

impl MessageHeader {
    pub(crate) fn request(nmimt: MessageType) -> Self {
        Self {
            nmimt: (nmimt.id() & 0xf) << 3,
        }
    }

    pub(crate) fn nmimt(&self) -> Result<MessageType, u8> {
        ((self.nmimt >> 3) & 0xf).try_into()
    }

    pub(crate) fn ror(&self) -> bool {
        (self.nmimt & 0x80) != 0
    }
}

// MI v2.0, 4.1.2, Figure 29
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[repr(u8)]
pub enum ResponseStatus {
    Success = 0x00,
    MoreProcessingRequired = 0x01,
    InternalError = 0x02,
    InvalidCommandOpcode = 0x03,
    InvalidParameter = 0x04,
    InvalidCommandSize = 0x05,
    InvalidCommandInputDataSize = 0x06,
    AccessDenied = 0x07,
}
unsafe impl Discriminant<u8> for ResponseStatus {}

impl CommandError {
    /// Classify the raw status byte where it maps to a defined MI status.
    pub fn response_status(&self) -> Option<ResponseStatus> {
        match self {
            Self::Status(raw) => ResponseStatus::from_u8(*raw),
            Self::Truncated { .. } => None,
        }
    }
}

// MI v2.0, 5, Figure 68
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum MiOpcode {
    ReadNvmeMiDataStructure = 0x00,
    NvmSubsystemHealthStatusPoll = 0x01,
    ControllerHealthStatusPoll = 0x02,
    ConfigurationSet = 0x03,
    ConfigurationGet = 0x04,
}
unsafe impl Discriminant<u8> for MiOpcode {}

/// One logical MI command: the opcode and its two request dwords.
#[derive(Clone, Copy, Debug)]
pub struct MiCommand {
    pub opcode: MiOpcode,
    pub cdw0: u32,
    pub cdw1: u32,
}

// MI v2.0, 5, Figure 67
#[derive(Debug, DekuRead, DekuWrite, Eq, PartialEq)]
#[deku(endian = "little")]
pub(crate) struct NvmeMiCommandRequestHeader {
    #[deku(pad_bytes_after = "3")]
    pub opcode: u8,
    pub cdw0: u32,
    pub cdw1: u32,
}
impl Encode<12> for NvmeMiCommandRequestHeader {}

// MI v2.0, 4.1.2, Figure 28; 5, Figure 71
//
// Also the shape of the short error response any failed command may carry
// in place of its command-specific response header.
#[derive(Debug, DekuRead, DekuWrite, Eq, PartialEq)]
#[deku(endian = "little")]
pub(crate) struct NvmeMiCommandResponseHeader {
    pub status: u8,
    pub nmresp: [u8; 3],
}

// MI v2.0, 5, Figure 75
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ConfigurationIdentifier {
    SmbusI2cFrequency = 0x01,
    HealthStatusChange = 0x02,
    MctpTransmissionUnitSize = 0x03,
}
unsafe impl Discriminant<u8> for ConfigurationIdentifier {}

// MI v2.0, 5.7, Figure 109, DTYP
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum DataStructureType {
    NvmSubsystemInformation = 0x00,
    PortInformation = 0x01,
    ControllerList = 0x02,
    ControllerInformation = 0x03,
    OptionallySupportedCommandList = 0x04,
    ManagementEndpointBufferCommandSupportList = 0x05,
}
unsafe impl Discriminant<u8> for DataStructureType {}

// MI v2.0, 6, Figure 136
#[derive(Debug, DekuRead, DekuWrite, Eq, PartialEq)]
#[deku(endian = "little")]
pub(crate) struct AdminCommandRequestHeader {
    pub opcode: u8,
    pub cflgs: u8,
    pub ctlid: u16,
    pub cdw1: u32,
    pub cdw2: u32,
    pub cdw3: u32,
    pub cdw4: u32,
    pub cdw5: u32,
    pub dofst: u32,
    #[deku(pad_bytes_after = "8")]
    pub dlen: u32,
    pub cdw10: u32,
    pub cdw11: u32,
    pub cdw12: u32,
    pub cdw13: u32,
    pub cdw14: u32,
    pub cdw15: u32,
}
impl Encode<64> for AdminCommandRequestHeader {}

// MI v2.0, 6, Figure 138
#[derive(Debug, DekuRead, DekuWrite, Eq, PartialEq)]
#[deku(endian = "little")]
pub(crate) struct AdminCommandResponseHeader {
    pub status: u8,
    #[deku(seek_from_start = "4")]
    pub cqedw0: u32,
    pub cqedw1: u32,
    pub cqedw3: u32,
}

/// Completion dwords 0, 1 and 3 from an Admin response.
///
/// Contents are opcode-specific and not interpreted by the transfer engine.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AdminCompletion {
    pub cdw0: u32,
    pub cdw1: u32,
    pub cdw3: u32,
}

// MI v2.0, 5.7.1, Figure 112
#[derive(Debug, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct NvmSubsystemInformation {
    pub nump: u8,
    pub mjr: u8,
    pub mnr: u8,
    pub nnsc: u8,
}

impl NvmSubsystemInformation {
    /// SES Reporting Supported capability.
    pub fn sre(&self) -> bool {
        self.nnsc & 1 != 0
    }
}

// MI v2.0, 5.7.2, Figure 115
#[derive(Debug, DekuRead, DekuWrite)]
#[deku(ctx = "endian: Endian", endian = "endian")]
pub struct PciePortData {
    pub pciemps: u8,
    pub pcieslsv: u8,
    pub pciecls: u8,
    pub pciemlw: u8,
    pub pcienlw: u8,
    pub pciepn: u8,
}

// MI v2.0, 5.7.2, Figure 116
#[derive(Debug, DekuRead, DekuWrite)]
#[deku(ctx = "endian: Endian", endian = "endian")]
pub struct TwoWirePortData {
    pub cvpdaddr: u8,
    pub mvpdfreq: u8,
    pub cmeaddr: u8,
    pub twprt: u8,
    pub nvmebm: u8,
}

// MI v2.0, 5.7.2, Figures 114-116
#[derive(Debug, DekuRead, DekuWrite)]
#[deku(ctx = "endian: Endian, prttyp: u8", id = "prttyp", endian = "endian")]
#[repr(u8)]
pub enum PortData {
    Inactive = 0x00,
    #[deku(id = "0x01")]
    Pcie(PciePortData),
    #[deku(id = "0x02")]
    TwoWire(TwoWirePortData),
}

// MI v2.0, 5.7.2, Figure 114
#[derive(Debug, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct PortInformation {
    prttyp: u8,
    pub prtcap: u8,
    pub mmtus: u16,
    pub mebs: u32,
    #[deku(ctx = "*prttyp")]
    pub data: PortData,
}

// Base v2.1, 5.1.13.2.12; MI v2.0, 5.7.3
#[derive(Debug, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct ControllerList {
    #[deku(update = "self.ids.len()")]
    numids: u16,
    #[deku(count = "numids")]
    ids: WireVec<u16, 2047>,
}

impl ControllerList {
    pub fn ids(&self) -> &[u16] {
        self.ids.as_slice()
    }

    pub fn controllers(&self) -> impl Iterator<Item = ControllerId> + '_ {
        self.ids.as_slice().iter().map(|&id| ControllerId(id))
    }
}

// MI v2.0, 5.7.4, Figure 117
#[derive(Debug, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct ControllerInformation {
    #[deku(pad_bytes_after = "4")]
    pub portid: u8,
    pub prii: u8,
    pub pri: u16,
    pub pcivid: u16,
    pub pcidid: u16,
    pub pcisvid: u16,
    pub pcisdid: u16,
    pub pciesn: u8,
}

// MI v2.0, 5.6, Figure 107
flags! {
    #[repr(u16)]
    pub enum CompositeControllerStatusFlags: u16 {
        Rdy = 1 << 0,
        Cfs = 1 << 1,
        Shst = 1 << 2,
        Nssro = 1 << 4,
        Ceco = 1 << 5,
        Nac = 1 << 6,
        Fa = 1 << 7,
        Csts = 1 << 8,
        Ctemp = 1 << 9,
        Pdlu = 1 << 10,
        Spare = 1 << 11,
        Cwarn = 1 << 12,
        Tcida = 1 << 13,
    }
}

// MI v2.0, 5.6, Figures 107, 108
#[derive(Debug, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct NvmSubsystemHealth {
    pub nss: u8,
    pub sw: u8,
    pub ctemp: u8,
    pub pldu: u8,
    #[deku(pad_bytes_after = "2")]
    ccsf: WireFlagSet<CompositeControllerStatusFlags>,
}

impl NvmSubsystemHealth {
    /// Composite Controller Status accumulated since the last cleared poll.
    pub fn composite_status(&self) -> FlagSet<CompositeControllerStatusFlags> {
        self.ccsf.0
    }

    /// Composite temperature, degrees Celsius, saturated per Figure 108.
    pub fn ctemp_celsius(&self) -> i8 {
        self.ctemp as i8
    }
}
