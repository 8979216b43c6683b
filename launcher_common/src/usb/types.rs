//! Wire protocol types.
//!
//! - `Command` - command bitmask carried in byte 1 of every control frame
//! - `CommandFrame` - the fixed 8-byte data stage of a command transfer
//! - `SetupPacket` - the vendor-specific control request header
//! - `LimitState` / `LimitAxis` - decoded limit-switch flags
//! - `DeviceId` - vendor/product identity used for attach matching

use crate::usb::consts::{
    CMD_DOWN, CMD_FIRE, CMD_LEFT, CMD_RIGHT, CMD_STOP, CMD_UP, CTRL_COMMAND_PREFIX,
    CTRL_FRAME_LEN, CTRL_INDEX, CTRL_REQUEST, CTRL_REQUEST_TYPE, CTRL_VALUE,
    LAUNCHER_PRODUCT_ID, LAUNCHER_VENDOR_ID, STATUS_MAX_DOWN, STATUS_MAX_LEFT,
    STATUS_MAX_RIGHT, STATUS_MAX_UP, STATUS_MIN_LEN,
};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use std::fmt;

bitflags! {
    /// Command bitmask sent as the payload byte of a control frame.
    ///
    /// Directions may be combined (e.g. `UP | LEFT`). Unknown bits are
    /// retained and forwarded to the device unchanged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Command: u8 {
        /// Tilt down.
        const DOWN  = CMD_DOWN;
        /// Tilt up.
        const UP    = CMD_UP;
        /// Pan left.
        const LEFT  = CMD_LEFT;
        /// Pan right.
        const RIGHT = CMD_RIGHT;
        /// Fire.
        const FIRE  = CMD_FIRE;
        /// Stop all motion.
        const STOP  = CMD_STOP;
    }
}

impl Command {
    /// Directions that can run into a travel limit.
    pub const MOTION_MASK: Self = Self::from_bits_truncate(
        Self::DOWN.bits() | Self::UP.bits() | Self::LEFT.bits() | Self::RIGHT.bits(),
    );

    /// Returns true if the command drives at least one axis.
    #[inline]
    pub const fn is_motion(&self) -> bool {
        self.intersects(Self::MOTION_MASK)
    }

    /// Parse a command name as used by the CLI (`up`, `down-left`, `fire`, `0x20`, ...).
    pub fn parse_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        if let Some(hex) = name.strip_prefix("0x") {
            return u8::from_str_radix(hex, 16).ok().map(Self::from_bits_retain);
        }
        let command = match name.as_str() {
            "up" => Self::UP,
            "down" => Self::DOWN,
            "left" => Self::LEFT,
            "right" => Self::RIGHT,
            "up-left" => Self::UP | Self::LEFT,
            "up-right" => Self::UP | Self::RIGHT,
            "down-left" => Self::DOWN | Self::LEFT,
            "down-right" => Self::DOWN | Self::RIGHT,
            "fire" => Self::FIRE,
            "stop" => Self::STOP,
            _ => return None,
        };
        Some(command)
    }
}

impl Default for Command {
    fn default() -> Self {
        Self::STOP
    }
}

/// Fixed data stage of a command control transfer: `[0x02, cmd, 0, 0, 0, 0, 0, 0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame([u8; CTRL_FRAME_LEN]);

const_assert_eq!(core::mem::size_of::<CommandFrame>(), 8);

impl CommandFrame {
    /// Build the frame for a command.
    pub const fn new(command: Command) -> Self {
        Self::from_byte(command.bits())
    }

    /// Build the frame for a raw payload byte.
    pub const fn from_byte(byte: u8) -> Self {
        let mut data = [0u8; CTRL_FRAME_LEN];
        data[0] = CTRL_COMMAND_PREFIX;
        data[1] = byte;
        Self(data)
    }

    /// The stop frame used by autonomous corrections.
    pub const STOP: Self = Self::new(Command::STOP);

    /// Raw frame bytes.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; CTRL_FRAME_LEN] {
        &self.0
    }

    /// Write the frame into a preallocated buffer of at least 8 bytes.
    ///
    /// Returns false (and leaves the buffer untouched) if it is too short.
    pub fn write_into(&self, buffer: &mut [u8]) -> bool {
        match buffer.get_mut(..CTRL_FRAME_LEN) {
            Some(dst) => {
                dst.copy_from_slice(&self.0);
                true
            }
            None => false,
        }
    }

    /// Decode the command byte from a received frame.
    pub fn decode(bytes: &[u8]) -> Option<Command> {
        match bytes {
            [CTRL_COMMAND_PREFIX, cmd, ..] if bytes.len() == CTRL_FRAME_LEN => {
                Some(Command::from_bits_retain(*cmd))
            }
            _ => None,
        }
    }
}

/// Control request header of a command transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
    /// wLength
    pub length: u16,
}

impl SetupPacket {
    /// The vendor-specific command request (0x21 / 0x09, 8-byte data stage).
    pub const LAUNCHER_COMMAND: Self = Self {
        request_type: CTRL_REQUEST_TYPE,
        request: CTRL_REQUEST,
        value: CTRL_VALUE,
        index: CTRL_INDEX,
        length: CTRL_FRAME_LEN as u16,
    };

    /// Little-endian wire encoding of the setup stage.
    pub const fn to_bytes(&self) -> [u8; 8] {
        let value = self.value.to_le_bytes();
        let index = self.index.to_le_bytes();
        let length = self.length.to_le_bytes();
        [
            self.request_type,
            self.request,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ]
    }
}

/// One direction of travel with a limit switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitAxis {
    /// Upper tilt limit.
    Up,
    /// Lower tilt limit.
    Down,
    /// Left pan limit.
    Left,
    /// Right pan limit.
    Right,
}

impl LimitAxis {
    /// Command bit that drives towards this limit.
    pub const fn command(self) -> Command {
        match self {
            LimitAxis::Up => Command::UP,
            LimitAxis::Down => Command::DOWN,
            LimitAxis::Left => Command::LEFT,
            LimitAxis::Right => Command::RIGHT,
        }
    }
}

/// Limit-switch flags reported on the status channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitState {
    /// Tilt at upper limit.
    pub max_up: bool,
    /// Tilt at lower limit.
    pub max_down: bool,
    /// Pan at left limit.
    pub max_left: bool,
    /// Pan at right limit.
    pub max_right: bool,
}

impl LimitState {
    /// Decode the limit flags from a status payload.
    ///
    /// Returns `None` if the payload is shorter than two bytes.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        if payload.len() < STATUS_MIN_LEN {
            return None;
        }
        Some(Self {
            max_up: payload[0] & STATUS_MAX_UP != 0,
            max_down: payload[0] & STATUS_MAX_DOWN != 0,
            max_left: payload[1] & STATUS_MAX_LEFT != 0,
            max_right: payload[1] & STATUS_MAX_RIGHT != 0,
        })
    }

    /// Encode the flags as the two-byte status payload.
    pub const fn encode(&self) -> [u8; 2] {
        let mut byte0 = 0;
        let mut byte1 = 0;
        if self.max_up {
            byte0 |= STATUS_MAX_UP;
        }
        if self.max_down {
            byte0 |= STATUS_MAX_DOWN;
        }
        if self.max_left {
            byte1 |= STATUS_MAX_LEFT;
        }
        if self.max_right {
            byte1 |= STATUS_MAX_RIGHT;
        }
        [byte0, byte1]
    }

    /// Packed single-byte form (bit 0 = up, 1 = down, 2 = left, 3 = right).
    pub const fn to_bits(&self) -> u8 {
        (self.max_up as u8)
            | (self.max_down as u8) << 1
            | (self.max_left as u8) << 2
            | (self.max_right as u8) << 3
    }

    /// Inverse of [`LimitState::to_bits`].
    pub const fn from_bits(bits: u8) -> Self {
        Self {
            max_up: bits & 0x01 != 0,
            max_down: bits & 0x02 != 0,
            max_left: bits & 0x04 != 0,
            max_right: bits & 0x08 != 0,
        }
    }

    /// Whether the limit in the given direction is tripped.
    pub const fn is_tripped(&self, axis: LimitAxis) -> bool {
        match axis {
            LimitAxis::Up => self.max_up,
            LimitAxis::Down => self.max_down,
            LimitAxis::Left => self.max_left,
            LimitAxis::Right => self.max_right,
        }
    }

    /// Returns true if any limit is tripped.
    pub const fn any(&self) -> bool {
        self.max_up || self.max_down || self.max_left || self.max_right
    }
}

/// USB vendor/product identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    /// idVendor
    pub vendor_id: u16,
    /// idProduct
    pub product_id: u16,
}

impl DeviceId {
    /// The supported launcher turret.
    pub const LAUNCHER: Self = Self::new(LAUNCHER_VENDOR_ID, LAUNCHER_PRODUCT_ID);

    /// Construct an identity.
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Identities this driver attaches to.
pub const SUPPORTED_DEVICES: &[DeviceId] = &[DeviceId::LAUNCHER];
