// Feetech STS serial bus
//
// Instruction packet: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// Status packet:      [0xFF, 0xFF, ID, Length, Error, Params..., Checksum]
// Length counts everything after itself; checksum is !sum(ID..last param).

use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, trace};

pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
// Reply timeout while pinging and configuring; the control loop shortens it
pub const DEFAULT_TIMEOUT_MS: u64 = 20;

/// Broadcast id, used by sync write
pub const BROADCAST_ID: u8 = 0xFE;

const HEADER: [u8; 2] = [0xFF, 0xFF];

#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    SyncWrite = 0x83,
}

/// STS3215 control table entries used by the drivetrain
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Register {
    OperatingMode = 33,   // 1 byte: 0=position, 1=velocity, 2=PWM, 3=step
    TorqueEnable = 40,    // 1 byte
    GoalTime = 44,        // 2 bytes, PWM duty in PWM mode (bit 10 = direction)
    GoalVelocity = 46,    // 2 bytes, bit 15 = direction
    Lock = 55,            // 1 byte
    PresentPosition = 56, // 2 bytes, 0..4095
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatingMode {
    Position = 0,
    Velocity = 1,
    Pwm = 2,
}

#[derive(Debug, thiserror::Error)]
pub enum FeetechError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from servo {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for servo {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Servo {id} returned error status: 0x{status:02X}")]
    ServoError { id: u8, status: u8 },

    #[error("Timeout waiting for response from servo {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, FeetechError>;

fn checksum(body: &[u8]) -> u8 {
    !body.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Encode an instruction packet
pub fn encode_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(params.len() + 6);
    packet.extend_from_slice(&HEADER);
    packet.push(id);
    packet.push((params.len() + 2) as u8);
    packet.push(instruction as u8);
    packet.extend_from_slice(params);
    packet.push(checksum(&packet[2..]));
    packet
}

/// Check a status packet body (everything after the header) and return its params
///
/// `body` is `[ID, Length, Error, Params..., Checksum]`.
pub fn decode_status(expected_id: u8, body: &[u8]) -> Result<Vec<u8>> {
    let invalid = |reason: String| FeetechError::InvalidResponse {
        id: expected_id,
        reason,
    };

    if body.len() < 4 {
        return Err(invalid(format!("short status packet: {:02X?}", body)));
    }
    let (id, length) = (body[0], body[1] as usize);
    if id != expected_id {
        return Err(invalid(format!("id mismatch, got {}", id)));
    }
    if body.len() != length + 2 {
        return Err(invalid(format!("length {} but {} bytes", length, body.len() - 2)));
    }

    let (content, received) = body.split_at(body.len() - 1);
    if checksum(content) != received[0] {
        return Err(FeetechError::ChecksumMismatch { id });
    }
    if content[2] != 0 {
        return Err(FeetechError::ServoError {
            id,
            status: content[2],
        });
    }
    Ok(content[3..].to_vec())
}

/// Signed value with the sign carried in `sign_bit` and magnitude below it
pub fn encode_signed(value: i16, sign_bit: u8) -> u16 {
    let magnitude = value.unsigned_abs() & ((1u16 << sign_bit) - 1);
    if value < 0 {
        magnitude | (1 << sign_bit)
    } else {
        magnitude
    }
}

/// A Feetech bus on one serial port
pub struct FeetechBus {
    port: Box<dyn SerialPort>,
}

impl FeetechBus {
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;
        debug!("Opened Feetech bus on {} at {} baud", port_name, baudrate);
        Ok(Self { port })
    }

    /// Reply timeout for every following read
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.port.set_timeout(timeout)?;
        debug!("Bus reply timeout set to {:?}", timeout);
        Ok(())
    }

    fn send(&mut self, id: u8, instruction: Instruction, params: &[u8]) -> Result<()> {
        let packet = encode_packet(id, instruction, params);
        trace!("-> {:02X?}", packet);
        self.port.write_all(&packet)?;
        self.port.flush()?;
        Ok(())
    }

    fn receive(&mut self, id: u8) -> Result<Vec<u8>> {
        let timeout = |e: std::io::Error| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                FeetechError::Timeout { id }
            } else {
                FeetechError::Io(e)
            }
        };

        let mut head = [0u8; 4];
        self.port.read_exact(&mut head).map_err(timeout)?;
        if head[..2] != HEADER {
            return Err(FeetechError::InvalidResponse {
                id,
                reason: format!("bad header {:02X?}", &head[..2]),
            });
        }

        let mut body = vec![head[2], head[3]];
        body.resize(2 + head[3] as usize, 0);
        self.port.read_exact(&mut body[2..]).map_err(timeout)?;
        trace!("<- {:02X?}", body);
        decode_status(id, &body)
    }

    /// True if the servo answers a ping
    pub fn ping(&mut self, id: u8) -> Result<bool> {
        self.send(id, Instruction::Ping, &[])?;
        match self.receive(id) {
            Ok(_) => Ok(true),
            Err(FeetechError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        self.send(id, Instruction::Write, &[register as u8, value])?;
        self.receive(id).map(|_| ())
    }

    pub fn write_u16(&mut self, id: u8, register: Register, value: u16) -> Result<()> {
        let [lo, hi] = value.to_le_bytes();
        self.send(id, Instruction::Write, &[register as u8, lo, hi])?;
        self.receive(id).map(|_| ())
    }

    pub fn read_u8(&mut self, id: u8, register: Register) -> Result<u8> {
        self.send(id, Instruction::Read, &[register as u8, 1])?;
        let params = self.receive(id)?;
        params.first().copied().ok_or_else(|| FeetechError::InvalidResponse {
            id,
            reason: "empty read".to_string(),
        })
    }

    pub fn read_u16(&mut self, id: u8, register: Register) -> Result<u16> {
        self.send(id, Instruction::Read, &[register as u8, 2])?;
        match self.receive(id)?.as_slice() {
            [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
            other => Err(FeetechError::InvalidResponse {
                id,
                reason: format!("expected 2 bytes, got {}", other.len()),
            }),
        }
    }

    /// Write one 2-byte register on several servos in a single packet (no reply)
    pub fn sync_write_u16(&mut self, register: Register, data: &[(u8, u16)]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut params = vec![register as u8, 2];
        for &(id, value) in data {
            params.push(id);
            params.extend_from_slice(&value.to_le_bytes());
        }
        self.send(BROADCAST_ID, Instruction::SyncWrite, &params)
    }

    pub fn set_torque(&mut self, id: u8, enabled: bool) -> Result<()> {
        self.write_u8(id, Register::TorqueEnable, enabled as u8)?;
        self.write_u8(id, Register::Lock, enabled as u8)
    }

    /// Must be called with torque disabled
    pub fn set_operating_mode(&mut self, id: u8, mode: OperatingMode) -> Result<()> {
        self.write_u8(id, Register::OperatingMode, mode as u8)
    }

    /// Absolute shaft position, 0..4095 per revolution
    pub fn present_position(&mut self, id: u8) -> Result<u16> {
        self.read_u16(id, Register::PresentPosition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        // ~(1+4+3+30+0+2) = ~40 = 215
        assert_eq!(checksum(&[1u8, 4, 0x03, 30, 0, 2]), 215);
        // Sum overflows a byte
        assert_eq!(checksum(&[0xFE, 0x04, 0x83, 0x10]), !0x95u8);
    }

    #[test]
    fn test_encode_ping() {
        let packet = encode_packet(1, Instruction::Ping, &[]);
        assert_eq!(packet, vec![0xFF, 0xFF, 1, 2, 0x01, !4u8]);
    }

    #[test]
    fn test_decode_status_ok() {
        // id 3, length 4, no error, params [0x34, 0x12]
        let content = [3u8, 4, 0, 0x34, 0x12];
        let mut body = content.to_vec();
        body.push(checksum(&content));
        assert_eq!(decode_status(3, &body).unwrap(), vec![0x34, 0x12]);
    }

    #[test]
    fn test_decode_status_errors() {
        let content = [3u8, 2, 0x20];
        let mut body = content.to_vec();
        body.push(checksum(&content));
        assert!(matches!(
            decode_status(3, &body),
            Err(FeetechError::ServoError { id: 3, status: 0x20 })
        ));
        assert!(matches!(
            decode_status(4, &body),
            Err(FeetechError::InvalidResponse { id: 4, .. })
        ));

        let mut corrupt = body.clone();
        *corrupt.last_mut().unwrap() ^= 0xFF;
        assert!(matches!(
            decode_status(3, &corrupt),
            Err(FeetechError::ChecksumMismatch { id: 3 })
        ));
    }

    #[test]
    fn test_signed_encoding() {
        assert_eq!(encode_signed(100, 15), 100);
        assert_eq!(encode_signed(-100, 15), 0x8064);
        assert_eq!(encode_signed(-1000, 10), 0x400 | 1000);
        assert_eq!(encode_signed(0, 10), 0);
    }
}
