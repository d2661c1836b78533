//! Function code catalogue.
//!
//! Covers the public function codes of the Modbus application protocol.
//! Anything not listed is reported as "Unknown"; whether it may pass is a
//! policy question, not a parsing one.

use crate::protocol::mbap::EXCEPTION_FLAG;

pub const READ_COILS: u8 = 0x01;
pub const READ_DISCRETE_INPUTS: u8 = 0x02;
pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const READ_INPUT_REGISTERS: u8 = 0x04;
pub const WRITE_SINGLE_COIL: u8 = 0x05;
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const READ_EXCEPTION_STATUS: u8 = 0x07;
pub const DIAGNOSTICS: u8 = 0x08;
pub const GET_COMM_EVENT_COUNTER: u8 = 0x0B;
pub const GET_COMM_EVENT_LOG: u8 = 0x0C;
pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
pub const REPORT_SERVER_ID: u8 = 0x11;
pub const READ_FILE_RECORD: u8 = 0x14;
pub const WRITE_FILE_RECORD: u8 = 0x15;
pub const MASK_WRITE_REGISTER: u8 = 0x16;
pub const READ_WRITE_MULTIPLE_REGISTERS: u8 = 0x17;
pub const READ_FIFO_QUEUE: u8 = 0x18;
pub const ENCAPSULATED_INTERFACE: u8 = 0x2B;

/// Human-readable name for logs and decision records.
pub fn name(function_code: u8) -> &'static str {
    match function_code {
        READ_COILS => "Read Coils",
        READ_DISCRETE_INPUTS => "Read Discrete Inputs",
        READ_HOLDING_REGISTERS => "Read Holding Registers",
        READ_INPUT_REGISTERS => "Read Input Registers",
        WRITE_SINGLE_COIL => "Write Single Coil",
        WRITE_SINGLE_REGISTER => "Write Single Register",
        READ_EXCEPTION_STATUS => "Read Exception Status",
        DIAGNOSTICS => "Diagnostics",
        GET_COMM_EVENT_COUNTER => "Get Comm Event Counter",
        GET_COMM_EVENT_LOG => "Get Comm Event Log",
        WRITE_MULTIPLE_COILS => "Write Multiple Coils",
        WRITE_MULTIPLE_REGISTERS => "Write Multiple Registers",
        REPORT_SERVER_ID => "Report Server ID",
        READ_FILE_RECORD => "Read File Record",
        WRITE_FILE_RECORD => "Write File Record",
        MASK_WRITE_REGISTER => "Mask Write Register",
        READ_WRITE_MULTIPLE_REGISTERS => "Read/Write Multiple Registers",
        READ_FIFO_QUEUE => "Read FIFO Queue",
        ENCAPSULATED_INTERFACE => "Encapsulated Interface Transport",
        fc if fc & EXCEPTION_FLAG != 0 => "Exception",
        _ => "Unknown",
    }
}

/// Whether the function code mutates controller state.
///
/// Read/Write Multiple Registers counts as a write: it writes before it reads.
pub fn is_write(function_code: u8) -> bool {
    matches!(
        function_code,
        WRITE_SINGLE_COIL
            | WRITE_SINGLE_REGISTER
            | WRITE_MULTIPLE_COILS
            | WRITE_MULTIPLE_REGISTERS
            | WRITE_FILE_RECORD
            | MASK_WRITE_REGISTER
            | READ_WRITE_MULTIPLE_REGISTERS
    )
}

/// Modbus exception codes carried in exception responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetFailedToRespond = 0x0B,
}

impl ExceptionCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}
