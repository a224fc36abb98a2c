//! Device identity, bootloader mode, and the two-zone client data model.

use crate::error::Error;
use crate::transport::DeviceDescriptor;

/// Apple's USB vendor ID, used by every device this library supports.
pub const APPLE_VENDOR_ID: u16 = 0x05AC;

/// USB product IDs for the bootloader modes this library drives.
pub mod product_id {
    pub const RECOVERY_1: u16 = 0x1280;
    pub const RECOVERY_2: u16 = 0x1281;
    pub const RECOVERY_3: u16 = 0x1282;
    pub const RECOVERY_4: u16 = 0x1283;
    pub const WTF: u16 = 0x1222;
    pub const DFU: u16 = 0x1227;
}

/// The bootloader mode a device is running in, as reported by its USB product ID
/// (with PWNDFU layered on top when the identity string carries a `PWND:` tag).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Recovery1,
    Recovery2,
    Recovery3,
    Recovery4,
    Wtf,
    Dfu,
    /// A DFU-mode device that has been exploited ("pwned"); signalled purely
    /// by the identity string's `PWND:` tag, not by a distinct product ID.
    PwnDfu,
    Unknown,
}

impl Mode {
    /// Classifies a raw USB product ID into a bootloader mode. Unsupported
    /// product IDs map to `Mode::Unknown` rather than failing, since this is
    /// also used for display/logging of devices this library didn't adopt.
    pub fn from_product_id(product_id: u16) -> Self {
        match product_id {
            product_id::RECOVERY_1 => Mode::Recovery1,
            product_id::RECOVERY_2 => Mode::Recovery2,
            product_id::RECOVERY_3 => Mode::Recovery3,
            product_id::RECOVERY_4 => Mode::Recovery4,
            product_id::WTF => Mode::Wtf,
            product_id::DFU => Mode::Dfu,
            _ => Mode::Unknown,
        }
    }

    /// True for the four recovery-mode product IDs; false for WTF and DFU,
    /// which use DFU-style control-transfer framing instead of bulk transfers.
    pub fn is_recovery(&self) -> bool {
        matches!(
            self,
            Mode::Recovery1 | Mode::Recovery2 | Mode::Recovery3 | Mode::Recovery4
        )
    }

    /// True for DFU and WTF, the two modes that speak the DFU class protocol.
    pub fn is_dfu_like(&self) -> bool {
        matches!(self, Mode::Dfu | Mode::Wtf)
    }

    /// The human-readable name the original tool reports for this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Recovery1 | Mode::Recovery2 | Mode::Recovery3 | Mode::Recovery4 => "Recovery",
            Mode::Wtf => "WTF",
            Mode::Dfu => "DFU",
            Mode::PwnDfu => "PWNDFU",
            Mode::Unknown => "Unknown",
        }
    }
}

/// Returns true iff `descriptor` identifies a device this library knows how to drive.
pub fn is_supported(descriptor: &DeviceDescriptor) -> bool {
    descriptor.vendor_id == APPLE_VENDOR_ID
        && matches!(
            descriptor.product_id,
            product_id::RECOVERY_1
                | product_id::RECOVERY_2
                | product_id::RECOVERY_3
                | product_id::RECOVERY_4
                | product_id::WTF
                | product_id::DFU
        )
}

/// Fields extracted from a device's identity string (§4.4) once finalized.
///
/// All string/nonce fields are owned allocations whose lifetime equals the
/// enclosing [AttachedDevice]'s; there are no raw pointers or caller-managed
/// buffers anywhere in this struct, unlike the C structure it's modeled on.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub cpid: u32,
    pub cprv: u32,
    pub cpfm: u32,
    pub scep: u32,
    pub bdid: u32,
    pub ecid: u64,
    pub ibfl: u32,
    pub srnm: String,
    pub imei: String,
    pub srtg: String,
    /// The raw iSerialNumber string the identity was parsed from, kept around
    /// for callers that want to display or log it verbatim.
    pub raw_serial_string: String,
    /// Present iff the identity string carried a `PWND:` tag; its value is
    /// the bracketed payload (typically a free-form jailbreak tool banner).
    pub pwnd: Option<String>,
    pub ap_nonce: Vec<u8>,
    pub sep_nonce: Vec<u8>,
    /// The USB product ID the identity was read from.
    pub product_id: u16,
}

impl DeviceInfo {
    /// True iff the identity string carried a `PWND:` tag.
    pub fn is_pwned(&self) -> bool {
        self.pwnd.is_some()
    }
}

/// Finalization is a tri-state, not a boolean: a device can be adopted but
/// not yet identified (`Pending`), fully identified and configured
/// (`Finalized`), or irrecoverably stuck for this adoption (`Blocked`).
/// `Blocked` is cleared only by a detach event (§9) — there is intentionally
/// no API to clear it directly, to avoid retry storms against a device that
/// keeps failing the same way.
#[derive(Debug)]
pub enum FinalizationState {
    Pending,
    Finalized,
    Blocked { reason: Error },
}

/// A device the event state machine has adopted: its transport handle,
/// descriptor, current finalization state, and (once finalized) its parsed
/// identity. Bundling these together makes "handle present but descriptor
/// absent" unrepresentable, which a flat set of `Option` fields would not.
#[derive(Debug)]
pub struct AttachedDevice {
    pub handle: crate::transport::DeviceHandle,
    pub descriptor: DeviceDescriptor,
    pub finalization: FinalizationState,
    pub info: DeviceInfo,
}

impl AttachedDevice {
    pub(crate) fn new(handle: crate::transport::DeviceHandle, descriptor: DeviceDescriptor) -> Self {
        AttachedDevice {
            handle,
            descriptor,
            finalization: FinalizationState::Pending,
            info: DeviceInfo::default(),
        }
    }

    /// The bootloader mode, accounting for PWNDFU (§4.7: `get_mode` reports
    /// PWNDFU whenever the identity carries a `PWND:` tag, regardless of the
    /// underlying product ID).
    pub fn mode(&self) -> Mode {
        if self.info.is_pwned() {
            Mode::PwnDfu
        } else {
            Mode::from_product_id(self.descriptor.product_id)
        }
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self.finalization, FinalizationState::Finalized)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.finalization, FinalizationState::Pending)
    }
}

/// The client's device zone (§3): either empty, or attached to exactly one
/// device. Modeled as a sum type rather than a set of nullable fields so the
/// "self-consistent or entirely zero" invariant is enforced by construction.
#[derive(Debug)]
pub enum DeviceZone {
    Empty,
    Attached(AttachedDevice),
}

impl Default for DeviceZone {
    fn default() -> Self {
        DeviceZone::Empty
    }
}

impl DeviceZone {
    pub fn is_empty(&self) -> bool {
        matches!(self, DeviceZone::Empty)
    }

    pub fn attached(&self) -> Option<&AttachedDevice> {
        match self {
            DeviceZone::Attached(device) => Some(device),
            DeviceZone::Empty => None,
        }
    }

    pub fn attached_mut(&mut self) -> Option<&mut AttachedDevice> {
        match self {
            DeviceZone::Attached(device) => Some(device),
            DeviceZone::Empty => None,
        }
    }

    /// Clears the zone, dropping (and thereby releasing) any owned strings/nonces.
    pub fn clear(&mut self) {
        *self = DeviceZone::Empty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DeviceHandle;

    #[test]
    fn classifies_pwndfu_over_raw_product_id() {
        let mut device = AttachedDevice::new(
            DeviceHandle(1),
            DeviceDescriptor {
                vendor_id: APPLE_VENDOR_ID,
                product_id: product_id::DFU,
            },
        );
        assert_eq!(device.mode(), Mode::Dfu);

        device.info.pwnd = Some("whatever".into());
        assert_eq!(device.mode(), Mode::PwnDfu);
    }

    #[test]
    fn rejects_unsupported_vendor() {
        let descriptor = DeviceDescriptor {
            vendor_id: 0x1234,
            product_id: product_id::DFU,
        };
        assert!(!is_supported(&descriptor));
    }

    #[test]
    fn accepts_every_documented_product_id() {
        for pid in [
            product_id::RECOVERY_1,
            product_id::RECOVERY_2,
            product_id::RECOVERY_3,
            product_id::RECOVERY_4,
            product_id::WTF,
            product_id::DFU,
        ] {
            let descriptor = DeviceDescriptor {
                vendor_id: APPLE_VENDOR_ID,
                product_id: pid,
            };
            assert!(is_supported(&descriptor));
        }
    }

    #[test]
    fn device_zone_defaults_empty() {
        let zone = DeviceZone::default();
        assert!(zone.is_empty());
        assert!(zone.attached().is_none());
    }
}
