//! Launcher device constants.
//!
//! Identity, control-transfer framing, command bits, status bits and
//! driver timing defaults.

/// Canonical driver name (used for logging and device node naming).
pub const LAUNCHER_DRIVER_NAME: &str = "launcher";

/// Vendor id of the supported turret.
pub const LAUNCHER_VENDOR_ID: u16 = 0x2123;

/// Product id of the supported turret.
pub const LAUNCHER_PRODUCT_ID: u16 = 0x1010;

// ─── Control transfer framing ───────────────────────────────────────

/// bmRequestType: host-to-device, class, interface.
pub const CTRL_REQUEST_TYPE: u8 = 0x21;

/// bRequest: HID SET_REPORT.
pub const CTRL_REQUEST: u8 = 0x09;

/// wValue of every command transfer.
pub const CTRL_VALUE: u16 = 0x0000;

/// wIndex of every command transfer.
pub const CTRL_INDEX: u16 = 0x0000;

/// Length of the command data stage.
pub const CTRL_FRAME_LEN: usize = 8;

/// First byte of every command frame.
pub const CTRL_COMMAND_PREFIX: u8 = 0x02;

/// Default control endpoint address.
pub const CONTROL_ENDPOINT: u8 = 0x00;

// ─── Command bits ───────────────────────────────────────────────────

/// Move down.
pub const CMD_DOWN: u8 = 0x01;
/// Move up.
pub const CMD_UP: u8 = 0x02;
/// Rotate left.
pub const CMD_LEFT: u8 = 0x04;
/// Rotate right.
pub const CMD_RIGHT: u8 = 0x08;
/// Fire one missile.
pub const CMD_FIRE: u8 = 0x10;
/// Stop all motion.
pub const CMD_STOP: u8 = 0x20;

// ─── Status (interrupt-IN) payload bits ─────────────────────────────

/// byte0: tilt at upper travel limit.
pub const STATUS_MAX_UP: u8 = 0x80;
/// byte0: tilt at lower travel limit.
pub const STATUS_MAX_DOWN: u8 = 0x40;
/// byte1: pan at left travel limit.
pub const STATUS_MAX_LEFT: u8 = 0x04;
/// byte1: pan at right travel limit.
pub const STATUS_MAX_RIGHT: u8 = 0x08;

/// Minimum number of status bytes required to decode the limit flags.
pub const STATUS_MIN_LEN: usize = 2;

/// Status buffer size allocated at attach.
pub const DEFAULT_STATUS_BUFFER_SIZE: usize = 8;

// ─── Timing ─────────────────────────────────────────────────────────

/// Blocking timeout of a command transfer in milliseconds.
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5000;

/// Bounded wait of a drain before force-cancelling, in milliseconds.
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 1000;

/// Default number of minors the device registry hands out.
pub const DEFAULT_MAX_DEVICES: usize = 16;
