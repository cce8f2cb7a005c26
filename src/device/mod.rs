//! Device Descriptor Index - SVD register map
//!
//! Parses a CMSIS-SVD hardware description into a peripheral/register/field
//! hierarchy and answers two kinds of lookups against it:
//! - address → register (with its bit fields)
//! - `PERIPH` / `PERIPH.REGISTER` → base, offset and absolute address
//!
//! The index is built once and never mutated afterwards, so it can be shared
//! by reference with every query.

mod svd;


use serde::Serialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading a hardware description
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Failed to read hardware description {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed hardware description: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("Root element is <{0}>, expected <device>")]
    NotSvd(String),

    #[error("Missing <{element}> in {context}")]
    MissingElement {
        element: &'static str,
        context: String,
    },

    #[error("Invalid <{element}> value '{value}' in {context}")]
    InvalidNumber {
        element: &'static str,
        value: String,
        context: String,
    },

    #[error("Peripheral {peripheral} is derived from unknown peripheral {base}")]
    UnknownBase { peripheral: String, base: String },
}

/// Malformed lookup input. Unknown names/addresses are not errors, see
/// [`Resolution`] and [`Description`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Invalid address format: {0}")]
    InvalidAddress(String),

    #[error("Invalid register name '{0}', expected PERIPH or PERIPH.REGISTER")]
    InvalidName(String),
}

/// A named bit range inside a register
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name: String,
    pub bit_offset: u32,
    pub bit_width: u32,
    pub description: String,
}

/// A register at a fixed offset from its peripheral's base
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    pub name: String,
    /// Offset relative to the owning peripheral's base address
    pub offset: u64,
    pub description: String,
    /// Register width in bits, if the description states it
    pub size: Option<u32>,
    pub reset_value: Option<u64>,
    pub access: Option<String>,
    pub fields: Vec<Field>,
}

/// A hardware block occupying a region of the address space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peripheral {
    pub name: String,
    pub base_address: u64,
    pub description: String,
    pub registers: Vec<Register>,
}

impl Peripheral {
    /// Absolute address of one of this peripheral's registers
    pub fn address_of(&self, register: &Register) -> u64 {
        self.base_address.wrapping_add(register.offset)
    }

    fn register_named(&self, name: &str) -> Option<&Register> {
        self.registers
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
    }
}

/// Root of the descriptor tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub description: String,
    pub peripherals: Vec<Peripheral>,
}

/// Result of a successful address lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterMatch {
    pub peripheral: String,
    pub register: String,
    pub address: String,
    pub description: String,
    pub fields: Vec<Field>,
}

/// Outcome of [`DeviceIndex::resolve_address`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Resolution {
    Found(RegisterMatch),
    NotFound { address: String },
}

/// Peripheral summary returned by [`DeviceIndex::describe`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeripheralInfo {
    pub peripheral: String,
    pub base_address: String,
    pub description: String,
    pub registers: Vec<String>,
}

/// Register location returned by [`DeviceIndex::describe`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterInfo {
    pub peripheral: String,
    pub register: String,
    pub base_address: String,
    pub offset: String,
    pub absolute_address: String,
    pub description: String,
}

/// Outcome of [`DeviceIndex::describe`].
///
/// A missing peripheral and a missing register under a known peripheral are
/// reported separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Description {
    Peripheral(PeripheralInfo),
    Register(RegisterInfo),
    PeripheralNotFound { peripheral: String },
    RegisterNotFound { peripheral: String, register: String },
}

/// Read-only, queryable view of a [`Device`]
#[derive(Debug, Clone)]
pub struct DeviceIndex {
    device: Device,
}

impl DeviceIndex {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    /// Load and parse an SVD file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DeviceError> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let text = fs::read_to_string(&path).map_err(|source| DeviceError::Io {
            path: path_str.clone(),
            source,
        })?;
        let index = Self::from_svd(&text)?;
        log::info!(
            "Loaded hardware description {} ({} peripherals, {} registers)",
            path_str,
            index.device.peripherals.len(),
            index.register_count()
        );
        Ok(index)
    }

    /// Parse SVD text
    pub fn from_svd(text: &str) -> Result<Self, DeviceError> {
        svd::parse_device(text).map(Self::new)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn register_count(&self) -> usize {
        self.device
            .peripherals
            .iter()
            .map(|p| p.registers.len())
            .sum()
    }

    /// Find the register living at `hex_addr`.
    ///
    /// Peripherals are scanned in document order; they are not assumed to be
    /// sorted or non-overlapping, so when two registers share an absolute
    /// address the first one in the description wins.
    pub fn resolve_address(&self, hex_addr: &str) -> Result<Resolution, QueryError> {
        let addr = parse_hex_address(hex_addr)?;

        for periph in &self.device.peripherals {
            if addr < periph.base_address {
                continue;
            }
            let offset = addr - periph.base_address;

            if let Some(reg) = periph.registers.iter().find(|r| r.offset == offset) {
                return Ok(Resolution::Found(RegisterMatch {
                    peripheral: periph.name.clone(),
                    register: reg.name.clone(),
                    address: format!("{:#x}", addr),
                    description: reg.description.clone(),
                    fields: reg.fields.clone(),
                }));
            }
        }

        log::debug!("No register at {:#x}", addr);
        Ok(Resolution::NotFound {
            address: format!("{:#x}", addr),
        })
    }

    /// Look up `PERIPH` or `PERIPH.REGISTER` (case-insensitive)
    pub fn describe(&self, name: &str) -> Result<Description, QueryError> {
        let name = name.trim();
        let mut parts = name.split('.');
        let p_name = parts.next().unwrap_or("");
        let r_name = parts.next();

        if p_name.is_empty() || parts.next().is_some() || r_name == Some("") {
            return Err(QueryError::InvalidName(name.to_string()));
        }

        let Some(periph) = self
            .device
            .peripherals
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(p_name))
        else {
            return Ok(Description::PeripheralNotFound {
                peripheral: p_name.to_ascii_uppercase(),
            });
        };

        let Some(r_name) = r_name else {
            return Ok(Description::Peripheral(PeripheralInfo {
                peripheral: periph.name.clone(),
                base_address: format!("{:#x}", periph.base_address),
                description: periph.description.clone(),
                registers: periph.registers.iter().map(|r| r.name.clone()).collect(),
            }));
        };

        match periph.register_named(r_name) {
            Some(reg) => Ok(Description::Register(RegisterInfo {
                peripheral: periph.name.clone(),
                register: reg.name.clone(),
                base_address: format!("{:#x}", periph.base_address),
                offset: format!("{:#x}", reg.offset),
                absolute_address: format!("{:#x}", periph.address_of(reg)),
                description: reg.description.clone(),
            })),
            None => Ok(Description::RegisterNotFound {
                peripheral: periph.name.clone(),
                register: r_name.to_ascii_uppercase(),
            }),
        }
    }
}

/// Parse a hex address with or without a `0x` prefix
pub fn parse_hex_address(s: &str) -> Result<u64, QueryError> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(QueryError::InvalidAddress(s.to_string()));
    }
    u64::from_str_radix(digits, 16).map_err(|_| QueryError::InvalidAddress(s.to_string()))
}
