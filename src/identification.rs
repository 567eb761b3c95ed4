//! Display identification data parsing
//!
//! Devices that support multiple displays return an EDID-like block per
//! display. Only the fields needed for a stable identity and for product
//! info are decoded: the PNP manufacturer ID, product code, manufacture date
//! and the display-name descriptor.

use tracing::debug;

use crate::display_id::PhysicalDisplayId;

const EDID_HEADER: [u8; 8] = [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];
const EDID_BLOCK_LEN: usize = 128;
const DESCRIPTOR_OFFSETS: [usize; 4] = [54, 72, 90, 108];
const DESCRIPTOR_LEN: usize = 18;
const DESCRIPTOR_TAG_DISPLAY_NAME: u8 = 0xFC;

/// When the panel was built, or which model year it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManufactureOrModelDate {
    ModelYear(u16),
    ManufactureYear(u16),
    ManufactureWeekAndYear { week: u8, year: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProductInfo {
    pub name: String,
    pub manufacturer_pnp_id: String,
    pub product_id: String,
    pub manufacture_or_model_date: ManufactureOrModelDate,
}

/// What a hotplug connect resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayIdentificationInfo {
    pub id: PhysicalDisplayId,
    pub name: String,
    pub device_product_info: Option<DeviceProductInfo>,
}

/// Raw identification block as returned by the device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayIdentificationData {
    pub port: u8,
    pub data: Vec<u8>,
}

/// Decoded subset of an EDID base block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edid {
    pub manufacturer_id: u16,
    pub pnp_id: [u8; 3],
    pub product_id: u16,
    pub serial: u32,
    pub display_name: Option<String>,
    pub date: ManufactureOrModelDate,
}

pub fn is_edid(bytes: &[u8]) -> bool {
    bytes.len() >= EDID_BLOCK_LEN && bytes[..EDID_HEADER.len()] == EDID_HEADER
}

pub fn parse_edid(bytes: &[u8]) -> Option<Edid> {
    if !is_edid(bytes) {
        debug!(len = bytes.len(), "Identification data is not an EDID block");
        return None;
    }

    let manufacturer_id = u16::from_be_bytes([bytes[8], bytes[9]]);
    let pnp_id = pnp_id_from_manufacturer(manufacturer_id)?;
    let product_id = u16::from_le_bytes([bytes[10], bytes[11]]);
    let serial = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);

    let week = bytes[16];
    let year = 1990 + u16::from(bytes[17]);
    let date = match week {
        0xFF => ManufactureOrModelDate::ModelYear(year),
        0 => ManufactureOrModelDate::ManufactureYear(year),
        week => ManufactureOrModelDate::ManufactureWeekAndYear { week, year },
    };

    let display_name = DESCRIPTOR_OFFSETS
        .iter()
        .map(|&offset| &bytes[offset..offset + DESCRIPTOR_LEN])
        .find(|desc| desc[..3] == [0, 0, 0] && desc[3] == DESCRIPTOR_TAG_DISPLAY_NAME)
        .map(|desc| descriptor_text(&desc[5..]))
        .filter(|name| !name.is_empty());

    Some(Edid {
        manufacturer_id,
        pnp_id,
        product_id,
        serial,
        display_name,
        date,
    })
}

/// Turn an identification block into a stable identity plus product info.
/// Returns `None` when the block cannot be parsed; callers fall back to a
/// port-derived identity.
pub fn parse_display_identification_data(
    port: u8,
    data: &[u8],
) -> Option<DisplayIdentificationInfo> {
    let edid = parse_edid(data)?;

    let model = edid
        .display_name
        .clone()
        .unwrap_or_else(|| edid.product_id.to_string());
    let id = PhysicalDisplayId::from_edid(port, edid.manufacturer_id, fnv1a_32(model.as_bytes()));
    let name = edid.display_name.clone().unwrap_or_default();

    Some(DisplayIdentificationInfo {
        id,
        name: name.clone(),
        device_product_info: Some(DeviceProductInfo {
            name,
            manufacturer_pnp_id: edid.pnp_id.iter().map(|&b| b as char).collect(),
            product_id: edid.product_id.to_string(),
            manufacture_or_model_date: edid.date,
        }),
    })
}

/// Three 5-bit letters packed big-endian, 'A' = 1
fn pnp_id_from_manufacturer(manufacturer_id: u16) -> Option<[u8; 3]> {
    let letter = |shift: u16| -> Option<u8> {
        let v = ((manufacturer_id >> shift) & 0x1F) as u8;
        (1..=26).contains(&v).then(|| b'A' + v - 1)
    };
    Some([letter(10)?, letter(5)?, letter(0)?])
}

/// Descriptor text ends at a newline and is space padded
fn descriptor_text(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == b'\n').unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).trim_end().to_string()
}

fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811C_9DC5u32, |hash, &b| {
        (hash ^ u32::from(b)).wrapping_mul(0x0100_0193)
    })
}
