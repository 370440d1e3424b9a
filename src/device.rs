//! Device catalog: families, product ids and register addresses.
//!
//! The data lives in `devices/families.yaml` so it can be audited against
//! AN2606 without reading code.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_TRANSFER_SIZE;
use crate::error::Result;

/// A group of devices sharing a flash map and register layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Family {
    /// Short tag used on the command line, e.g. `F1` or `NRG`.
    pub tag: String,
    pub description: String,
    /// Flash size data register, when the family has one at a fixed spot.
    #[serde(default, deserialize_with = "parse_optional_number")]
    pub flash_size_address: Option<u32>,
    /// 96-bit unique id register. Absent on parts without a UID.
    #[serde(default, deserialize_with = "parse_optional_number")]
    pub uid_address: Option<u32>,
    /// Largest read/write frame the family's bootloader accepts.
    #[serde(default = "default_transfer_size")]
    pub transfer_size: usize,
    /// Uniform erase page size; absent on sector-based families, where the
    /// caller has to supply explicit page lists.
    #[serde(default, deserialize_with = "parse_optional_number")]
    pub flash_page_size: Option<u32>,
    pub variants: Vec<Variant>,
}

/// One AN2606 table row: a product id and its marketing name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    #[serde(deserialize_with = "parse_number_field")]
    pub id: u32,
    pub name: String,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#05x})", self.name, self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    families: Vec<Family>,
}

impl Catalog {
    pub fn load() -> Result<Self> {
        let catalog: Catalog = serde_yaml::from_str(include_str!("../devices/families.yaml"))?;
        Ok(catalog)
    }

    pub fn families(&self) -> &[Family] {
        &self.families
    }

    /// Family owning the given product id, with the matching variant.
    pub fn family_for_id(&self, product_id: u32) -> Option<(&Family, &Variant)> {
        self.families.iter().find_map(|family| {
            family
                .variants
                .iter()
                .find(|v| v.id == product_id)
                .map(|variant| (family, variant))
        })
    }

    pub fn family_by_tag(&self, tag: &str) -> Option<&Family> {
        self.families
            .iter()
            .find(|f| f.tag.eq_ignore_ascii_case(tag))
    }

    pub fn variant_name(&self, product_id: u32) -> Option<&str> {
        self.family_for_id(product_id)
            .map(|(_, variant)| variant.name.as_str())
    }
}

const fn default_transfer_size() -> usize {
    MAX_TRANSFER_SIZE
}

/// Parses `0x...` hex, a `K` suffix for KiB, or plain decimal.
fn parse_number(s: &str) -> std::result::Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("bad hex value {s:?}: {e}"))
    } else if let Some(kib) = s.strip_suffix('K') {
        kib.parse::<u32>()
            .map(|n| n * 1024)
            .map_err(|e| format!("bad size {s:?}: {e}"))
    } else {
        s.parse().map_err(|e| format!("bad number {s:?}: {e}"))
    }
}

fn parse_number_field<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    parse_number(&s).map_err(serde::de::Error::custom)
}

fn parse_optional_number<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = serde::Deserialize::deserialize(deserializer)?;
    s.map(|s| parse_number(&s).map_err(serde::de::Error::custom))
        .transpose()
}
