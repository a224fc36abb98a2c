//! The command channel (§4.6): bootloader console commands, environment
//! helpers, and transfer teardown, all sent as vendor control transfers.

use log::debug;

use crate::device::{AttachedDevice, Mode};
use crate::error::{Error, UsbResult};
use crate::request::{dfu_request, BREQTYPE_COMMAND_IN, BREQTYPE_COMMAND_OUT, BREQTYPE_DFU_OUT};
use crate::transport::Transport;

/// Commands whose response the device is expected to act on immediately
/// rather than echo back over the console; these are sent with `bRequest = 1`.
const BREQ_ONE_COMMANDS: &[&str] = &["go", "bootx", "reboot", "memboot"];

/// Classifies `cmd` into the `bRequest` byte the original tool uses: `1` for
/// the small set of commands that hand control to the next boot stage, `0`
/// for everything else (plain console commands like `printenv`).
fn classify(cmd: &str) -> u8 {
    if BREQ_ONE_COMMANDS.contains(&cmd) {
        1
    } else {
        0
    }
}

/// Validates `cmd` is usable on `device`'s current mode and length, per §4.6.
fn validate(device: &AttachedDevice, cmd: &str) -> UsbResult<()> {
    let raw_mode = Mode::from_product_id(device.descriptor.product_id);
    if !raw_mode.is_recovery() {
        return Err(Error::ServiceNotAvailable);
    }
    if cmd.is_empty() {
        return Err(Error::NoCommand);
    }
    if cmd.len() >= 256 {
        return Err(Error::CommandTooLong);
    }
    Ok(())
}

/// Sends `cmd` to the device, classifying it into the appropriate `bRequest`
/// byte automatically (§4.6).
pub fn send_command(transport: &dyn Transport, device: &AttachedDevice, cmd: &str) -> UsbResult<()> {
    send_command_breq(transport, device, cmd, classify(cmd))
}

/// Sends `cmd` to the device using the caller-supplied `bRequest` byte,
/// bypassing the `go`/`bootx`/`reboot`/`memboot` classifier.
pub fn send_command_breq(
    transport: &dyn Transport,
    device: &AttachedDevice,
    cmd: &str,
    breq: u8,
) -> UsbResult<()> {
    validate(device, cmd)?;

    let mut payload = Vec::with_capacity(cmd.len() + 1);
    payload.extend_from_slice(cmd.as_bytes());
    payload.push(0);

    let written = transport.control_transfer_out(
        device.handle,
        BREQTYPE_COMMAND_OUT,
        breq,
        0,
        0,
        &payload,
    )?;
    if written != payload.len() {
        return Err(Error::UsbUploadFailed);
    }
    Ok(())
}

/// Reads up to 255 bytes of console response into `buf`, returning the
/// number of bytes read.
fn read_response(transport: &dyn Transport, device: &AttachedDevice, buf: &mut [u8]) -> UsbResult<usize> {
    transport.control_transfer_in(device.handle, BREQTYPE_COMMAND_IN, 0, 0, 0, buf)
}

/// Sends `printenv <name>` and returns the device's response, trimmed of any
/// trailing NUL padding.
pub fn getenv(transport: &dyn Transport, device: &AttachedDevice, name: &str) -> UsbResult<String> {
    send_command_breq(transport, device, &format!("printenv {name}"), 0)?;

    let mut buf = [0u8; 255];
    let read = read_response(transport, device, &mut buf)?;
    let end = buf[..read].iter().position(|&b| b == 0).unwrap_or(read);
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

/// Sends `setenv <name> <val>`.
pub fn setenv(transport: &dyn Transport, device: &AttachedDevice, name: &str, val: &str) -> UsbResult<()> {
    send_command_breq(transport, device, &format!("setenv {name} {val}"), 0)
}

/// Sends `setenvnp <name> <val>` (set without persisting to NVRAM).
pub fn setenvnp(transport: &dyn Transport, device: &AttachedDevice, name: &str, val: &str) -> UsbResult<()> {
    send_command_breq(transport, device, &format!("setenvnp {name} {val}"), 0)
}

/// Sends `saveenv`, persisting any pending `setenv` calls to NVRAM.
pub fn saveenv(transport: &dyn Transport, device: &AttachedDevice) -> UsbResult<()> {
    send_command_breq(transport, device, "saveenv", 0)
}

/// Sends `reboot`. Like the other env helpers, this always uses `bRequest = 0`
/// even though `"reboot"` would otherwise classify as `1` via [send_command] —
/// matching the original tool's `irecovery_reboot`, which hardcodes `b = 0`.
pub fn reboot(transport: &dyn Transport, device: &AttachedDevice) -> UsbResult<()> {
    send_command_breq(transport, device, "reboot", 0)
}

/// Reads a console response and returns only its first byte, discarding the
/// rest. This is a deliberately preserved quirk of the original tool's
/// `getret`, not an oversight: callers that only care about a single status
/// byte (e.g. `getenv`-style commands that reply with a short numeric code)
/// use this instead of parsing the full response buffer.
pub fn getret(transport: &dyn Transport, device: &AttachedDevice) -> UsbResult<u8> {
    let mut buf = [0u8; 255];
    let read = read_response(transport, device, &mut buf)?;
    if read == 0 {
        return Err(Error::InvalidUsbStatus);
    }
    Ok(buf[0])
}

/// Resets the DFU/WTF error-status latch. No-op in recovery mode, where
/// there's no DFU state machine to clear.
pub fn reset_counters(transport: &dyn Transport, device: &AttachedDevice) -> UsbResult<()> {
    let raw_mode = Mode::from_product_id(device.descriptor.product_id);
    if raw_mode.is_dfu_like() {
        transport.control_transfer_out(device.handle, BREQTYPE_DFU_OUT, dfu_request::CLRSTATUS, 0, 0, &[])?;
    }
    Ok(())
}

/// Ends a DFU/WTF transfer: a zero-length DNLOAD, three status polls, and a
/// bus reset.
pub fn finish_transfer(transport: &dyn Transport, device: &AttachedDevice) -> UsbResult<()> {
    transport.control_transfer_out(device.handle, BREQTYPE_DFU_OUT, dfu_request::DNLOAD, 0, 0, &[])?;

    for _ in 0..3 {
        let mut status_buf = [0u8; 6];
        let read = transport.control_transfer_in(
            device.handle,
            crate::request::BREQTYPE_DFU_IN,
            dfu_request::GETSTATUS,
            0,
            0,
            &mut status_buf,
        )?;
        if read != 6 {
            return Err(Error::InvalidUsbStatus);
        }
    }

    debug!("finishing transfer, resetting device");
    transport.reset_device(device.handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_go_as_breq_one() {
        assert_eq!(classify("go"), 1);
    }

    #[test]
    fn classifies_printenv_as_breq_zero() {
        assert_eq!(classify("printenv cpid"), 0);
    }

    #[test]
    fn classifies_every_breq_one_command() {
        for cmd in BREQ_ONE_COMMANDS {
            assert_eq!(classify(cmd), 1, "{cmd} should classify as breq=1");
        }
    }

    #[test]
    fn reboot_sends_breq_zero_despite_classifying_as_one() {
        use crate::device::{product_id, AttachedDevice};
        use crate::mock::MockTransport;
        use crate::transport::DeviceDescriptor;

        assert_eq!(classify("reboot"), 1, "sanity: reboot classifies as breq=1");

        let transport = MockTransport::new();
        let handle = transport.add_device(DeviceDescriptor {
            vendor_id: crate::device::APPLE_VENDOR_ID,
            product_id: product_id::RECOVERY_1,
        });
        let device = AttachedDevice::new(handle, DeviceDescriptor {
            vendor_id: crate::device::APPLE_VENDOR_ID,
            product_id: product_id::RECOVERY_1,
        });

        reboot(&transport, &device).unwrap();

        let log = transport.control_out_log();
        assert_eq!(log.len(), 1);
        let (request_type, breq, _value, _index, data) = &log[0];
        assert_eq!(*request_type, BREQTYPE_COMMAND_OUT);
        assert_eq!(*breq, 0, "reboot must wire bRequest=0, not the breq=1 'reboot' classifies as");
        assert_eq!(data, b"reboot\0");
    }

    #[test]
    fn rejects_command_at_256_bytes() {
        use crate::device::{product_id, AttachedDevice};
        use crate::transport::{DeviceDescriptor, DeviceHandle};

        let device = AttachedDevice::new(
            DeviceHandle(1),
            DeviceDescriptor { vendor_id: crate::device::APPLE_VENDOR_ID, product_id: product_id::RECOVERY_1 },
        );
        let cmd_255 = "a".repeat(255);
        let cmd_256 = "a".repeat(256);
        assert!(validate(&device, &cmd_255).is_ok());
        assert_eq!(
            validate(&device, &cmd_256).unwrap_err().code(),
            Error::CommandTooLong.code()
        );
    }

    #[test]
    fn rejects_empty_command() {
        use crate::device::{product_id, AttachedDevice};
        use crate::transport::{DeviceDescriptor, DeviceHandle};

        let device = AttachedDevice::new(
            DeviceHandle(1),
            DeviceDescriptor { vendor_id: crate::device::APPLE_VENDOR_ID, product_id: product_id::RECOVERY_1 },
        );
        assert_eq!(validate(&device, "").unwrap_err().code(), Error::NoCommand.code());
    }

    #[test]
    fn rejects_non_recovery_mode() {
        use crate::device::{product_id, AttachedDevice};
        use crate::transport::{DeviceDescriptor, DeviceHandle};

        let device = AttachedDevice::new(
            DeviceHandle(1),
            DeviceDescriptor { vendor_id: crate::device::APPLE_VENDOR_ID, product_id: product_id::DFU },
        );
        assert_eq!(
            validate(&device, "printenv cpid").unwrap_err().code(),
            Error::ServiceNotAvailable.code()
        );
    }
}
