//! `lsusb` output parsing and device-signature matching.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, YkmError};

/// One device line from a USB enumeration listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbDevice {
    pub bus: u16,
    pub device: u16,
    /// Lowercase 4-digit hex vendor id.
    pub vendor_id: String,
    /// Lowercase 4-digit hex product id.
    pub product_id: String,
    pub description: String,
}

impl UsbDevice {
    /// `vendor:product` in the familiar lsusb notation.
    #[must_use]
    pub fn id_pair(&self) -> String {
        format!("{}:{}", self.vendor_id, self.product_id)
    }
}

// Matches lines like:
//   Bus 001 Device 014: ID 1050:0407 Yubico.com Yubikey 4/5 OTP+U2F+CCID
static DEVICE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^Bus\s+(\d{1,3})\s+\w+\s+(\d{1,3}):\s+ID\s+([0-9a-f]{4}):([0-9a-f]{4})\s*(.*)$",
    )
    .unwrap()
});

/// Parse raw enumeration output into a device list.
///
/// Total over arbitrary input: lines that do not look like device entries
/// are skipped, never an error. Empty input yields an empty list.
#[must_use]
pub fn parse_devices(raw: &str) -> Vec<UsbDevice> {
    raw.lines()
        .filter_map(|line| parse_device_line(line.trim()))
        .collect()
}

fn parse_device_line(line: &str) -> Option<UsbDevice> {
    let caps = DEVICE_LINE.captures(line)?;
    let bus = caps.get(1)?.as_str().parse::<u16>().ok()?;
    let device = caps.get(2)?.as_str().parse::<u16>().ok()?;
    Some(UsbDevice {
        bus,
        device,
        vendor_id: caps.get(3)?.as_str().to_ascii_lowercase(),
        product_id: caps.get(4)?.as_str().to_ascii_lowercase(),
        description: caps.get(5).map_or("", |m| m.as_str()).trim().to_string(),
    })
}

/// A vendor plus a set of product ids, matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSignature {
    vendor_id: String,
    product_ids: Vec<String>,
}

impl DeviceSignature {
    /// Build a signature, normalizing the hex ids to lowercase.
    pub fn new(vendor_id: &str, product_ids: &[String]) -> Result<Self> {
        let vendor_id = vendor_id.trim().to_ascii_lowercase();
        if !is_hex_id(&vendor_id) {
            return Err(YkmError::InvalidConfig {
                details: format!("signature vendor id must be 4 hex digits, got {vendor_id:?}"),
            });
        }
        if product_ids.is_empty() {
            return Err(YkmError::InvalidConfig {
                details: "signature needs at least one product id".to_string(),
            });
        }
        let mut normalized = Vec::with_capacity(product_ids.len());
        for id in product_ids {
            let id = id.trim().to_ascii_lowercase();
            if !is_hex_id(&id) {
                return Err(YkmError::InvalidConfig {
                    details: format!("signature product id must be 4 hex digits, got {id:?}"),
                });
            }
            normalized.push(id);
        }
        Ok(Self {
            vendor_id,
            product_ids: normalized,
        })
    }

    #[must_use]
    pub fn vendor_id(&self) -> &str {
        &self.vendor_id
    }

    #[must_use]
    pub fn product_ids(&self) -> &[String] {
        &self.product_ids
    }

    /// Does this single device match the signature?
    #[must_use]
    pub fn matches(&self, device: &UsbDevice) -> bool {
        device.vendor_id == self.vendor_id
            && self.product_ids.iter().any(|p| *p == device.product_id)
    }

    /// Does any device in the list match?
    #[must_use]
    pub fn matches_any(&self, devices: &[UsbDevice]) -> bool {
        devices.iter().any(|d| self.matches(d))
    }

    /// Number of matching devices (several keys may be plugged at once).
    #[must_use]
    pub fn present_count(&self, devices: &[UsbDevice]) -> usize {
        devices.iter().filter(|d| self.matches(d)).count()
    }
}

fn is_hex_id(value: &str) -> bool {
    value.len() == 4 && value.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Bus 002 Device 001: ID 1d6b:0003 Linux Foundation 3.0 root hub
Bus 001 Device 014: ID 1050:0407 Yubico.com Yubikey 4/5 OTP+U2F+CCID
Bus 001 Device 003: ID 8087:0a2b Intel Corp. Bluetooth wireless interface
Bus 001 Device 001: ID 1d6b:0002 Linux Foundation 2.0 root hub
";

    fn yubikey_signature() -> DeviceSignature {
        DeviceSignature::new(
            "1050",
            &["0402".to_string(), "0405".to_string(), "0407".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn parses_standard_listing() {
        let devices = parse_devices(SAMPLE);
        assert_eq!(devices.len(), 4);
        assert_eq!(devices[1].bus, 1);
        assert_eq!(devices[1].device, 14);
        assert_eq!(devices[1].vendor_id, "1050");
        assert_eq!(devices[1].product_id, "0407");
        assert_eq!(
            devices[1].description,
            "Yubico.com Yubikey 4/5 OTP+U2F+CCID"
        );
    }

    #[test]
    fn empty_input_yields_empty_list() {
        assert!(parse_devices("").is_empty());
    }

    #[test]
    fn garbage_lines_are_skipped() {
        let raw = "not usb output\n\nBus three Device four: ID zzzz:yyyy nope\n";
        assert!(parse_devices(raw).is_empty());
    }

    #[test]
    fn mixed_garbage_and_device_lines() {
        let raw = format!("leading junk\n{SAMPLE}trailing junk\n");
        assert_eq!(parse_devices(&raw).len(), 4);
    }

    #[test]
    fn uppercase_hex_ids_are_normalized() {
        let raw = "Bus 001 Device 002: ID 1D6B:0A2B Some Device";
        let devices = parse_devices(raw);
        assert_eq!(devices[0].vendor_id, "1d6b");
        assert_eq!(devices[0].product_id, "0a2b");
    }

    #[test]
    fn missing_description_is_empty() {
        let raw = "Bus 001 Device 002: ID 1050:0407";
        let devices = parse_devices(raw);
        assert_eq!(devices.len(), 1);
        assert!(devices[0].description.is_empty());
    }

    #[test]
    fn signature_matches_listed_key() {
        let devices = parse_devices(SAMPLE);
        let sig = yubikey_signature();
        assert!(sig.matches_any(&devices));
        assert_eq!(sig.present_count(&devices), 1);
    }

    #[test]
    fn signature_ignores_other_products_of_same_vendor() {
        let raw = "Bus 001 Device 002: ID 1050:0111 Yubico.com Some Other Gadget";
        let sig = yubikey_signature();
        assert!(!sig.matches_any(&parse_devices(raw)));
    }

    #[test]
    fn signature_is_case_insensitive() {
        let sig = DeviceSignature::new("10C4", &["EA60".to_string()]).unwrap();
        let raw = "Bus 001 Device 005: ID 10c4:ea60 Silicon Labs CP210x UART Bridge";
        assert!(sig.matches_any(&parse_devices(raw)));
    }

    #[test]
    fn signature_rejects_malformed_ids() {
        assert!(DeviceSignature::new("105", &["0407".to_string()]).is_err());
        assert!(DeviceSignature::new("1050", &["04g7".to_string()]).is_err());
        assert!(DeviceSignature::new("1050", &[]).is_err());
    }

    #[test]
    fn counts_multiple_keys() {
        let raw = "\
Bus 001 Device 014: ID 1050:0407 Yubico.com Yubikey 4/5 OTP+U2F+CCID
Bus 001 Device 015: ID 1050:0402 Yubico.com Yubikey 4/5 U2F
";
        let sig = yubikey_signature();
        assert_eq!(sig.present_count(&parse_devices(raw)), 2);
    }

    #[test]
    fn id_pair_formats_vendor_colon_product() {
        let devices = parse_devices(SAMPLE);
        assert_eq!(devices[1].id_pair(), "1050:0407");
    }
}
