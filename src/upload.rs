//! The upload engine (§4.5): mode-switched packet framing, the DFU CRC-32
//! trailer, inter-packet status polling, and progress reporting.

use std::time::Duration;

use bitflags::bitflags;
use log::{debug, warn};

use crate::crc::{crc32_step, DFU_TRAILER_MAGIC};
use crate::device::{AttachedDevice, Mode};
use crate::error::{Error, UsbResult};
use crate::request::{dfu_request, dfu_state, dfu_status, BREQTYPE_DFU_IN, BREQTYPE_DFU_OUT, BREQTYPE_RECOVERY_UPLOAD_INIT};
use crate::sleep::Sleeper;
use crate::transport::Transport;

bitflags! {
    /// Options controlling how [send_buffer] finishes an upload.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct SendOptions: u32 {
        /// After the last packet, issue a zero-length DNLOAD and poll status
        /// twice more to let the device observe the transfer is complete.
        const DFU_NOTIFY_FINISH = 1 << 0;
        /// After notifying finish, also send a control-transfer ZLP before resetting.
        const DFU_FORCE_ZLP = 1 << 1;
        /// Reserved: recognized but has no effect, matching the original
        /// tool, which defines this option but never reads it anywhere.
        const DFU_SMALL_PKT = 1 << 2;
    }
}

/// Packet size used for recovery-mode bulk transfers.
const RECOVERY_PACKET_SIZE: usize = 0x8000;
/// Packet size used for DFU/WTF control-transfer chunks.
const DFU_PACKET_SIZE: usize = 0x800;
/// Bulk OUT endpoint used for recovery-mode uploads.
const RECOVERY_BULK_ENDPOINT: u8 = 0x04;
/// Maximum number of status-poll retries after a DFU/WTF packet.
const DFU_STATUS_RETRIES: usize = 20;

/// The kind of event reported through the progress callback. Only `Progress`
/// is emitted today; the variant exists so future terminal/error events can
/// be added without changing the callback's signature.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UploadEventKind {
    Progress,
}

/// A transient snapshot of upload progress, passed to the progress callback
/// after each successfully transmitted packet.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadEvent {
    pub cumulative_bytes: usize,
    pub label: &'static str,
    pub percent: f64,
    pub kind: UploadEventKind,
}

/// Callback invoked after each packet. Returning `false` aborts the upload
/// with [Error::UploadCancelled] (§4.5: "a non-zero return from the callback
/// aborts the upload").
pub type ProgressCallback<'a> = dyn FnMut(&UploadEvent) -> bool + 'a;

/// Uploads `buf` to the device, framing it according to `device`'s current mode.
///
/// `progress` is invoked after every packet with the cumulative byte count;
/// returning `false` stops the upload between packets.
pub fn send_buffer(
    transport: &dyn Transport,
    device: &AttachedDevice,
    sleeper: &dyn Sleeper,
    buf: &[u8],
    options: SendOptions,
    mut progress: Option<&mut ProgressCallback>,
) -> UsbResult<()> {
    let handle = device.handle;
    // Framing is keyed to the device's *raw* USB mode, not the PWNDFU
    // display mode `AttachedDevice::mode()` reports: a pwned DFU-mode device
    // still speaks the DFU control-transfer protocol on the wire.
    let raw_mode = Mode::from_product_id(device.descriptor.product_id);
    let recovery = !raw_mode.is_dfu_like();
    let packet_size = if recovery {
        RECOVERY_PACKET_SIZE
    } else {
        DFU_PACKET_SIZE
    };

    let len = buf.len();
    let (packets, last_packet_len) = packet_layout(len, packet_size);

    if recovery {
        transport.control_transfer_out(handle, BREQTYPE_RECOVERY_UPLOAD_INIT, 0, 0, 0, &[])?;
    } else {
        initiate_dfu_transfer(transport, handle)?;
    }

    let mut crc: u32 = 0xFFFFFFFF;
    let mut count = 0usize;

    for i in 0..packets {
        let is_last = i + 1 == packets;
        let size = if is_last { last_packet_len } else { packet_size };
        let chunk = &buf[i * packet_size..i * packet_size + size];

        // Bytes actually placed on the wire this iteration; for the DFU/WTF
        // final packet this includes the 16-byte trailer, so `count` (and
        // thus the progress percentage) can run slightly past `len` on the
        // very last packet, matching the original tool.
        let sent = if recovery {
            let written = transport.bulk_transfer_out(handle, RECOVERY_BULK_ENDPOINT, chunk)?;
            if written != size {
                return Err(Error::UsbUploadFailed);
            }
            size
        } else {
            for &b in chunk {
                crc = crc32_step(crc, b);
            }

            let sent = if is_last {
                send_dfu_final_chunk(transport, handle, i, chunk, &mut crc, packet_size)?
            } else {
                let written = transport.control_transfer_out(
                    handle,
                    BREQTYPE_DFU_OUT,
                    dfu_request::DNLOAD,
                    0,
                    i as u16,
                    chunk,
                )?;
                if written != size {
                    return Err(Error::UsbUploadFailed);
                }
                size
            };

            poll_until_download_busy(transport, handle, sleeper)?;
            sent
        };

        count += sent;

        if let Some(callback) = progress.as_deref_mut() {
            let event = UploadEvent {
                cumulative_bytes: count,
                label: "Uploading",
                percent: if len == 0 {
                    100.0
                } else {
                    100.0 * (count as f64) / (len as f64)
                },
                kind: UploadEventKind::Progress,
            };

            if !callback(&event) {
                return Err(Error::UploadCancelled);
            }
        } else {
            debug!("sent {size} bytes - {count} of {len}");
        }
    }

    if recovery && len % 512 == 0 {
        transport.bulk_transfer_out(handle, RECOVERY_BULK_ENDPOINT, &[])?;
    }

    if options.contains(SendOptions::DFU_NOTIFY_FINISH) && !recovery {
        transport.control_transfer_out(handle, BREQTYPE_DFU_OUT, dfu_request::DNLOAD, 0, packets as u16, &[])?;

        for _ in 0..2 {
            get_status(transport, handle)?;
        }

        if options.contains(SendOptions::DFU_FORCE_ZLP) {
            transport.control_transfer_out(handle, BREQTYPE_DFU_OUT, 0, 0, 0, &[])?;
        }

        transport.reset_device(handle)?;
    }

    Ok(())
}

/// Computes `(packet_count, final_packet_len)` for a payload of `len` bytes
/// chunked into `packet_size`-byte packets. A payload that's an exact
/// multiple of `packet_size` gets one full-size final packet rather than a
/// trailing empty one.
fn packet_layout(len: usize, packet_size: usize) -> (usize, usize) {
    let remainder = len % packet_size;
    let mut packets = len / packet_size;
    let last = if remainder != 0 {
        packets += 1;
        remainder
    } else {
        packet_size
    };
    (packets, last)
}

/// Issues the DFU/WTF upload-initiation sequence: read device state, and
/// dispatch on it per §4.5.
fn initiate_dfu_transfer(transport: &dyn Transport, handle: crate::transport::DeviceHandle) -> UsbResult<()> {
    let mut state_buf = [0u8; 1];
    let read = transport.control_transfer_in(handle, BREQTYPE_DFU_IN, dfu_request::GETSTATE, 0, 0, &mut state_buf)?;
    if read != 1 {
        return Err(Error::UsbUploadFailed);
    }

    match state_buf[0] {
        dfu_state::DFU_IDLE => Ok(()),
        dfu_state::DFU_ERROR => {
            warn!("DFU ERROR, issuing CLRSTATUS");
            transport.control_transfer_out(handle, BREQTYPE_DFU_OUT, dfu_request::CLRSTATUS, 0, 0, &[])?;
            Err(Error::UsbUploadFailed)
        }
        other => {
            warn!("unexpected DFU state {other}, issuing ABORT");
            transport.control_transfer_out(handle, BREQTYPE_DFU_OUT, dfu_request::ABORT, 0, 0, &[])?;
            Err(Error::UsbUploadFailed)
        }
    }
}

/// Sends the last packet of a DFU/WTF upload, attaching the 16-byte CRC
/// trailer either appended to the chunk (if it fits within one packet) or as
/// a standalone frame (if it doesn't), per §4.5. Returns the total number of
/// payload+trailer bytes placed on the wire across however many transfers
/// that took.
fn send_dfu_final_chunk(
    transport: &dyn Transport,
    handle: crate::transport::DeviceHandle,
    packet_index: usize,
    chunk: &[u8],
    crc: &mut u32,
    packet_size: usize,
) -> UsbResult<usize> {
    let mut remaining_chunk = chunk;
    let mut sent = 0usize;

    if chunk.len() + 16 > packet_size {
        let written = transport.control_transfer_out(
            handle,
            BREQTYPE_DFU_OUT,
            dfu_request::DNLOAD,
            0,
            packet_index as u16,
            chunk,
        )?;
        if written != chunk.len() {
            return Err(Error::UsbUploadFailed);
        }
        sent += chunk.len();
        remaining_chunk = &[];
    }

    for pair in DFU_TRAILER_MAGIC.chunks(6) {
        for &b in pair {
            *crc = crc32_step(*crc, b);
        }
    }

    let mut frame = Vec::with_capacity(remaining_chunk.len() + 16);
    frame.extend_from_slice(remaining_chunk);
    frame.extend_from_slice(&DFU_TRAILER_MAGIC);
    frame.extend_from_slice(&crc.to_le_bytes());

    let written = transport.control_transfer_out(
        handle,
        BREQTYPE_DFU_OUT,
        dfu_request::DNLOAD,
        0,
        packet_index as u16,
        &frame,
    )?;
    if written != frame.len() {
        return Err(Error::UsbUploadFailed);
    }
    sent += frame.len();

    Ok(sent)
}

/// Reads the 6-byte GETSTATUS response and returns byte index 4 (the status).
fn get_status(transport: &dyn Transport, handle: crate::transport::DeviceHandle) -> UsbResult<u8> {
    let mut buf = [0u8; 6];
    let read = transport.control_transfer_in(handle, BREQTYPE_DFU_IN, dfu_request::GETSTATUS, 0, 0, &mut buf)?;
    if read != 6 {
        return Err(Error::InvalidUsbStatus);
    }
    Ok(buf[4])
}

/// Polls GETSTATUS after a DFU/WTF packet until the device reports
/// download-busy, retrying up to [DFU_STATUS_RETRIES] times with a
/// one-second delay between attempts.
fn poll_until_download_busy(
    transport: &dyn Transport,
    handle: crate::transport::DeviceHandle,
    sleeper: &dyn Sleeper,
) -> UsbResult<()> {
    let mut status = get_status(transport, handle)?;
    if status == dfu_status::DFU_DOWNLOAD_BUSY {
        return Ok(());
    }

    for _ in 0..DFU_STATUS_RETRIES {
        sleeper.sleep(Duration::from_secs(1));
        status = get_status(transport, handle)?;
        if status == dfu_status::DFU_DOWNLOAD_BUSY {
            return Ok(());
        }
    }

    Err(Error::UsbUploadFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{product_id, AttachedDevice};
    use crate::mock::MockTransport;
    use crate::request::{BREQTYPE_DFU_IN, BREQTYPE_DFU_OUT};
    use crate::sleep::NoopSleeper;
    use crate::transport::DeviceDescriptor;

    #[test]
    fn layout_exact_multiple_gets_one_full_final_packet() {
        assert_eq!(packet_layout(0x1000, 0x800), (2, 0x800));
    }

    #[test]
    fn layout_remainder_gets_a_short_final_packet() {
        assert_eq!(packet_layout(0x1001, 0x800), (3, 1));
    }

    #[test]
    fn layout_small_payload_is_one_short_packet() {
        assert_eq!(packet_layout(10, 0x800), (1, 10));
    }

    /// Builds a `MockTransport` with one DFU-mode device attached, queuing a
    /// GETSTATE=idle reply and `status_polls` GETSTATUS=download-busy
    /// replies (one per packet `send_buffer` is expected to send).
    fn dfu_fixture(status_polls: usize) -> (MockTransport, AttachedDevice) {
        let transport = MockTransport::new();
        let handle = transport.add_device(DeviceDescriptor {
            vendor_id: crate::device::APPLE_VENDOR_ID,
            product_id: product_id::DFU,
        });
        transport.queue_control_in_response(BREQTYPE_DFU_IN, dfu_request::GETSTATE, vec![dfu_state::DFU_IDLE]);
        for _ in 0..status_polls {
            transport.queue_control_in_response(
                BREQTYPE_DFU_IN,
                dfu_request::GETSTATUS,
                vec![0, 0, 0, 0, dfu_status::DFU_DOWNLOAD_BUSY, 0],
            );
        }
        let device = AttachedDevice::new(handle, DeviceDescriptor {
            vendor_id: crate::device::APPLE_VENDOR_ID,
            product_id: product_id::DFU,
        });
        (transport, device)
    }

    #[test]
    fn dfu_short_payload_appends_trailer_to_the_one_packet() {
        // len=0x10 fits a single packet with room to spare for the 16-byte
        // trailer (0x10 + 16 <= 0x800), so only one DNLOAD frame is sent.
        let (transport, device) = dfu_fixture(1);
        let payload = vec![0xAAu8; 0x10];

        send_buffer(&transport, &device, &NoopSleeper, &payload, SendOptions::empty(), None).unwrap();

        let log = transport.control_out_log();
        assert_eq!(log.len(), 1);
        let (request_type, breq, _value, _index, frame) = &log[0];
        assert_eq!(*request_type, BREQTYPE_DFU_OUT);
        assert_eq!(*breq, dfu_request::DNLOAD);
        assert_eq!(frame.len(), payload.len() + 16);
        assert_eq!(&frame[..payload.len()], payload.as_slice());
        assert_eq!(&frame[payload.len()..payload.len() + 12], &DFU_TRAILER_MAGIC);

        let mut expected = payload.clone();
        expected.extend_from_slice(&DFU_TRAILER_MAGIC);
        let expected_crc = crate::crc::crc32(&expected);
        assert_eq!(&frame[payload.len() + 12..], &expected_crc.to_le_bytes());
    }

    #[test]
    fn dfu_trailer_boundary_forces_a_standalone_frame() {
        // L mod 0x800 == 0x800 - 8 forces the trailer into a standalone
        // frame, because (0x800 - 8) + 16 > 0x800.
        let (transport, device) = dfu_fixture(1);
        let payload = vec![0x00u8; 0x800 - 8];

        send_buffer(&transport, &device, &NoopSleeper, &payload, SendOptions::empty(), None).unwrap();

        let log = transport.control_out_log();
        assert_eq!(log.len(), 2, "expected the payload and the trailer as two separate frames");

        let (_, breq, _, _, chunk_frame) = &log[0];
        assert_eq!(*breq, dfu_request::DNLOAD);
        assert_eq!(chunk_frame, &payload);

        let (_, breq, _, _, trailer_frame) = &log[1];
        assert_eq!(*breq, dfu_request::DNLOAD);
        assert_eq!(trailer_frame.len(), 16);
        assert_eq!(&trailer_frame[..12], &DFU_TRAILER_MAGIC);

        let mut expected = payload.clone();
        expected.extend_from_slice(&DFU_TRAILER_MAGIC);
        let expected_crc = crate::crc::crc32(&expected);
        assert_eq!(&trailer_frame[12..], &expected_crc.to_le_bytes());
    }

    #[test]
    fn recovery_upload_sends_a_zlp_after_a_512_byte_multiple() {
        let transport = MockTransport::new();
        let handle = transport.add_device(DeviceDescriptor {
            vendor_id: crate::device::APPLE_VENDOR_ID,
            product_id: product_id::RECOVERY_1,
        });
        let device = AttachedDevice::new(handle, DeviceDescriptor {
            vendor_id: crate::device::APPLE_VENDOR_ID,
            product_id: product_id::RECOVERY_1,
        });
        let payload = vec![0xABu8; 512];

        send_buffer(&transport, &device, &NoopSleeper, &payload, SendOptions::empty(), None).unwrap();

        let control_log = transport.control_out_log();
        assert_eq!(control_log.len(), 1);
        assert_eq!(control_log[0].1, 0, "recovery upload-init is bRequest=0");

        let bulk_log = transport.bulk_out_log();
        assert_eq!(
            bulk_log,
            vec![(RECOVERY_BULK_ENDPOINT, payload.clone()), (RECOVERY_BULK_ENDPOINT, Vec::new())]
        );
    }

    #[test]
    fn recovery_upload_skips_the_zlp_when_not_a_512_byte_multiple() {
        let transport = MockTransport::new();
        let handle = transport.add_device(DeviceDescriptor {
            vendor_id: crate::device::APPLE_VENDOR_ID,
            product_id: product_id::RECOVERY_1,
        });
        let device = AttachedDevice::new(handle, DeviceDescriptor {
            vendor_id: crate::device::APPLE_VENDOR_ID,
            product_id: product_id::RECOVERY_1,
        });
        let payload = vec![0xABu8; 511];

        send_buffer(&transport, &device, &NoopSleeper, &payload, SendOptions::empty(), None).unwrap();

        let bulk_log = transport.bulk_out_log();
        assert_eq!(bulk_log, vec![(RECOVERY_BULK_ENDPOINT, payload)]);
    }
}
