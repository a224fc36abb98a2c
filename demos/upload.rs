//! Uploads a small in-memory buffer to a mock DFU-mode device, printing
//! progress as each packet is sent.

use iboot_usb::mock::MockTransport;
use iboot_usb::transport::{DeviceDescriptor, Role, UsbEvent};
use iboot_usb::{AdmissionPolicy, Client, ClientConfig, SendOptions};

fn encode_string_descriptor(s: &str) -> Vec<u8> {
    let units: Vec<u16> = s.encode_utf16().collect();
    let mut raw = Vec::with_capacity(2 + units.len() * 2);
    raw.push((2 + units.len() * 2) as u8);
    raw.push(3);
    for unit in units {
        raw.extend_from_slice(&unit.to_le_bytes());
    }
    raw
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let transport = MockTransport::new();
    transport.set_role(Role::Host);
    let handle = transport.add_device(DeviceDescriptor {
        vendor_id: iboot_usb::device::APPLE_VENDOR_ID,
        product_id: iboot_usb::device::product_id::DFU,
    });
    transport.set_string_descriptor(handle, 0, encode_string_descriptor("CPID:8010 ECID:01"));
    transport.set_string_descriptor(handle, 1, encode_string_descriptor("NONC:aabb SNON:1122"));
    // DFU GETSTATE/GETSTATUS: idle, then download-busy for every poll.
    transport.queue_control_in_response(0xA1, 5, vec![2]);
    for _ in 0..32 {
        transport.queue_control_in_response(0xA1, 3, vec![0, 0, 0, 0, 5, 0]);
    }
    transport.push_event(UsbEvent::DeviceEnabled { handle });

    let config = ClientConfig {
        admission_policy: AdmissionPolicy::AcceptAll,
        ..Default::default()
    };
    let mut client = Client::new(config, Box::new(transport))?;
    client.poll()?;

    let payload = vec![0xAAu8; 0x1200];
    let mut last_percent = -1.0;
    let mut on_progress = |event: &iboot_usb::UploadEvent| {
        if event.percent != last_percent {
            println!("{}: {:.1}%", event.label, event.percent);
            last_percent = event.percent;
        }
        true
    };

    client.send_buffer(&payload, SendOptions::DFU_NOTIFY_FINISH, Some(&mut on_progress))?;
    println!("upload complete");

    Ok(())
}
