//! The device table: a passive, process-wide lookup from (chip_id, board_id)
//! or (product_type, hardware_model) to a marketing display name.
//!
//! This is explicitly the one piece of the original tool's functionality the
//! distilled spec calls out as "a passive lookup" external to the core's
//! hard engineering (§1). It's still implemented here for real, as an
//! immutable slice in the teacher's data-oriented style (`device.rs`'s
//! `DeviceSelector`), rather than stubbed out — just kept intentionally small:
//! a representative sample of entries from the original tool's static table,
//! not the full multi-hundred-row list. Extending it is a matter of appending
//! rows; nothing about the lookup functions depends on the table's size.

/// One row of the device table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTableEntry {
    pub product_type: &'static str,
    pub hardware_model: &'static str,
    pub board_id: u32,
    pub chip_id: u32,
    pub display_name: &'static str,
}

/// A representative sample of Apple's (product_type, hardware_model, board_id,
/// chip_id) -> display_name mapping, transcribed from the original tool's
/// static table.
pub static DEVICE_TABLE: &[DeviceTableEntry] = &[
    DeviceTableEntry { product_type: "iPhone1,1", hardware_model: "m68ap", board_id: 0x00, chip_id: 0x8900, display_name: "iPhone 2G" },
    DeviceTableEntry { product_type: "iPhone2,1", hardware_model: "n88ap", board_id: 0x00, chip_id: 0x8920, display_name: "iPhone 3Gs" },
    DeviceTableEntry { product_type: "iPhone4,1", hardware_model: "n94ap", board_id: 0x08, chip_id: 0x8940, display_name: "iPhone 4s" },
    DeviceTableEntry { product_type: "iPhone6,1", hardware_model: "n51ap", board_id: 0x00, chip_id: 0x8960, display_name: "iPhone 5s (GSM)" },
    DeviceTableEntry { product_type: "iPhone9,1", hardware_model: "d10ap", board_id: 0x08, chip_id: 0x8010, display_name: "iPhone 7 (Global)" },
    DeviceTableEntry { product_type: "iPhone10,3", hardware_model: "d22ap", board_id: 0x06, chip_id: 0x8015, display_name: "iPhone X (Global)" },
    DeviceTableEntry { product_type: "iPhone11,2", hardware_model: "d321ap", board_id: 0x0e, chip_id: 0x8020, display_name: "iPhone XS" },
    DeviceTableEntry { product_type: "iPhone12,1", hardware_model: "n104ap", board_id: 0x04, chip_id: 0x8030, display_name: "iPhone 11" },
    DeviceTableEntry { product_type: "iPad6,11", hardware_model: "j71sap", board_id: 0x10, chip_id: 0x8000, display_name: "iPad (5th gen, WiFi)" },
];

/// Finds the table row matching the given chip id and board id, if any.
///
/// This is the lookup the finalization path (§4.2) would use once it has
/// parsed `CPID:`/`BDID:` out of the identity string, to turn those numeric
/// fields into a display name for logging or UI purposes.
pub fn by_chip_and_board(chip_id: u32, board_id: u32) -> Option<&'static DeviceTableEntry> {
    DEVICE_TABLE
        .iter()
        .find(|entry| entry.chip_id == chip_id && entry.board_id == board_id)
}

/// Finds the table row matching the given product type and hardware model strings.
pub fn by_product_and_hardware(
    product_type: &str,
    hardware_model: &str,
) -> Option<&'static DeviceTableEntry> {
    DEVICE_TABLE.iter().find(|entry| {
        entry.product_type.eq_ignore_ascii_case(product_type)
            && entry.hardware_model.eq_ignore_ascii_case(hardware_model)
    })
}
