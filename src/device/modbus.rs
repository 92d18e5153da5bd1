use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};
use std::io::{Cursor, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::ScanError;

// Protocol constants
pub const MBAP_HEADER_SIZE: usize = 7;
pub const PROTOCOL_ID: u16 = 0;
pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
pub const EXCEPTION_FLAG: u8 = 0x80;
pub const MAX_READ_REGISTERS: u16 = 125;
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Timeouts for the Modbus TCP connection
#[derive(Debug, Clone)]
pub struct ConnectionTimeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Default for ConnectionTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            read: Duration::from_secs(2),
            write: Duration::from_secs(2),
        }
    }
}

/// Frame encoding and decoding, independent of the socket
pub struct Frame;

impl Frame {
    fn header(buffer: &mut Vec<u8>, transaction: u16, unit: u8, pdu_len: usize) -> Result<(), ScanError> {
        buffer.write_u16::<BigEndian>(transaction)?;
        buffer.write_u16::<BigEndian>(PROTOCOL_ID)?;
        buffer.write_u16::<BigEndian>((pdu_len + 1) as u16)?;
        buffer.write_u8(unit)?;
        Ok(())
    }

    pub fn read_request(transaction: u16, unit: u8, address: u16, count: u16) -> Result<Vec<u8>, ScanError> {
        if count == 0 || count > MAX_READ_REGISTERS {
            return Err(ScanError::Protocol(format!(
                "register read count must be 1..={MAX_READ_REGISTERS}, got {count}"
            )));
        }
        let mut buffer = Vec::with_capacity(MBAP_HEADER_SIZE + 5);
        Self::header(&mut buffer, transaction, unit, 5)?;
        buffer.write_u8(READ_HOLDING_REGISTERS)?;
        buffer.write_u16::<BigEndian>(address)?;
        buffer.write_u16::<BigEndian>(count)?;
        Ok(buffer)
    }

    pub fn write_request(transaction: u16, unit: u8, address: u16, values: &[u16]) -> Result<Vec<u8>, ScanError> {
        if values.is_empty() || values.len() > MAX_WRITE_REGISTERS as usize {
            return Err(ScanError::Protocol(format!(
                "register write count must be 1..={MAX_WRITE_REGISTERS}, got {}",
                values.len()
            )));
        }
        let pdu_len = 6 + 2 * values.len();
        let mut buffer = Vec::with_capacity(MBAP_HEADER_SIZE + pdu_len);
        Self::header(&mut buffer, transaction, unit, pdu_len)?;
        buffer.write_u8(WRITE_MULTIPLE_REGISTERS)?;
        buffer.write_u16::<BigEndian>(address)?;
        buffer.write_u16::<BigEndian>(values.len() as u16)?;
        buffer.write_u8((2 * values.len()) as u8)?;
        for &value in values {
            buffer.write_u16::<BigEndian>(value)?;
        }
        Ok(buffer)
    }

    /// Parse the MBAP header and return the PDU length that follows it
    pub fn parse_header(header: &[u8; MBAP_HEADER_SIZE], transaction: u16) -> Result<usize, ScanError> {
        let mut cursor = Cursor::new(&header[..]);
        let rx_transaction = cursor.read_u16::<BigEndian>()?;
        let protocol = cursor.read_u16::<BigEndian>()?;
        let length = cursor.read_u16::<BigEndian>()? as usize;

        if rx_transaction != transaction {
            return Err(ScanError::Protocol(format!(
                "transaction mismatch: expected {transaction}, got {rx_transaction}"
            )));
        }
        if protocol != PROTOCOL_ID {
            return Err(ScanError::Protocol(format!("unexpected protocol id {protocol}")));
        }
        if length < 2 {
            return Err(ScanError::Protocol(format!("response length {length} too short")));
        }
        Ok(length - 1)
    }

    /// Check the function code of a response PDU and surface exceptions
    pub fn check_function(pdu: &[u8], function: u8) -> Result<(), ScanError> {
        match pdu.first() {
            Some(&code) if code == function => Ok(()),
            Some(&code) if code == function | EXCEPTION_FLAG => {
                let exception = pdu.get(1).copied().unwrap_or(0);
                Err(ScanError::Device(format!(
                    "Modbus exception {exception} for function 0x{function:02x}"
                )))
            }
            Some(&code) => Err(ScanError::Protocol(format!(
                "expected function 0x{function:02x}, got 0x{code:02x}"
            ))),
            None => Err(ScanError::Protocol("empty response".to_string())),
        }
    }

    pub fn parse_read_response(pdu: &[u8], count: u16) -> Result<Vec<u16>, ScanError> {
        Self::check_function(pdu, READ_HOLDING_REGISTERS)?;
        let byte_count = *pdu
            .get(1)
            .ok_or_else(|| ScanError::Protocol("missing byte count".to_string()))? as usize;
        if byte_count != 2 * count as usize || pdu.len() < 2 + byte_count {
            return Err(ScanError::Protocol(format!(
                "expected {} register bytes, got {byte_count}",
                2 * count
            )));
        }
        let mut cursor = Cursor::new(&pdu[2..2 + byte_count]);
        (0..count)
            .map(|_| cursor.read_u16::<BigEndian>().map_err(ScanError::from))
            .collect()
    }
}

/// Split a 32-bit value into two big-endian registers
pub fn u32_to_registers(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, value as u16]
}

pub fn registers_to_u32(registers: &[u16]) -> u32 {
    ((registers[0] as u32) << 16) | registers[1] as u32
}

pub fn registers_to_f32(registers: &[u16]) -> f32 {
    f32::from_bits(registers_to_u32(registers))
}

/// Blocking Modbus TCP client
pub struct ModbusClient {
    stream: TcpStream,
    transaction: u16,
    unit: u8,
}

impl ModbusClient {
    pub fn connect(address: &str, port: u16, timeouts: &ConnectionTimeouts) -> Result<Self, ScanError> {
        let socket_addr: SocketAddr = (address, port)
            .to_socket_addrs()
            .map_err(|_| ScanError::InvalidAddress(address.to_string()))?
            .next()
            .ok_or_else(|| ScanError::InvalidAddress(address.to_string()))?;

        debug!("Connecting to {socket_addr}");

        let stream = TcpStream::connect_timeout(&socket_addr, timeouts.connect).map_err(|e| {
            warn!("Failed to connect to {socket_addr}: {e}");
            if e.kind() == std::io::ErrorKind::TimedOut {
                ScanError::Timeout
            } else {
                ScanError::io(e, format!("Failed to connect to {socket_addr}"))
            }
        })?;

        stream.set_read_timeout(Some(timeouts.read))?;
        stream.set_write_timeout(Some(timeouts.write))?;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            transaction: 0,
            unit: 1,
        })
    }

    fn next_transaction(&mut self) -> u16 {
        self.transaction = self.transaction.wrapping_add(1);
        self.transaction
    }

    fn exchange(&mut self, request: &[u8], transaction: u16) -> Result<Vec<u8>, ScanError> {
        self.stream.write_all(request).map_err(|e| Self::map_io(e, "Writing request"))?;

        let mut header = [0u8; MBAP_HEADER_SIZE];
        self.stream
            .read_exact(&mut header)
            .map_err(|e| Self::map_io(e, "Reading response header"))?;
        let pdu_len = Frame::parse_header(&header, transaction)?;

        let mut pdu = vec![0u8; pdu_len];
        self.stream
            .read_exact(&mut pdu)
            .map_err(|e| Self::map_io(e, "Reading response body"))?;
        Ok(pdu)
    }

    fn map_io(e: std::io::Error, context: &str) -> ScanError {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => ScanError::Timeout,
            _ => ScanError::io(e, context),
        }
    }

    pub fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, ScanError> {
        let transaction = self.next_transaction();
        let request = Frame::read_request(transaction, self.unit, address, count)?;
        let pdu = self.exchange(&request, transaction)?;
        Frame::parse_read_response(&pdu, count)
    }

    pub fn write_registers(&mut self, address: u16, values: &[u16]) -> Result<(), ScanError> {
        let transaction = self.next_transaction();
        let request = Frame::write_request(transaction, self.unit, address, values)?;
        let pdu = self.exchange(&request, transaction)?;
        Frame::check_function(&pdu, WRITE_MULTIPLE_REGISTERS)
    }

    pub fn write_u16(&mut self, address: u16, value: u16) -> Result<(), ScanError> {
        self.write_registers(address, &[value])
    }

    pub fn write_u32(&mut self, address: u16, value: u32) -> Result<(), ScanError> {
        self.write_registers(address, &u32_to_registers(value))
    }

    pub fn read_u32(&mut self, address: u16) -> Result<u32, ScanError> {
        let registers = self.read_registers(address, 2)?;
        Ok(registers_to_u32(&registers))
    }

    pub fn read_f32(&mut self, address: u16) -> Result<f32, ScanError> {
        let registers = self.read_registers(address, 2)?;
        Ok(registers_to_f32(&registers))
    }
}
