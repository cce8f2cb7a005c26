//! Target image inspection
//!
//! Checks that the firmware handed to the debugger is a readable ELF before a
//! session is built around it, and records its entry point for status output.

use super::SessionError;
use goblin::elf::Elf;
use std::fs;
use std::path::{Path, PathBuf};

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Summary of the target executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetImage {
    pub path: PathBuf,
    pub entry_point: u64,
    /// Machine name, e.g. "ARM" or "RISC-V"
    pub machine: String,
    pub is_64bit: bool,
    pub little_endian: bool,
}

impl TargetImage {
    /// Read and validate an ELF file
    pub fn inspect<P: AsRef<Path>>(path: P) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| SessionError::Binary {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_bytes(&data, path)
    }

    pub fn from_bytes(data: &[u8], path: &Path) -> Result<Self, SessionError> {
        let invalid = |reason: String| SessionError::Binary {
            path: path.display().to_string(),
            reason,
        };

        if data.len() < ELF_MAGIC.len() || data[..4] != ELF_MAGIC {
            return Err(invalid("not an ELF image".into()));
        }

        let elf = Elf::parse(data).map_err(|e| invalid(e.to_string()))?;
        let image = Self {
            path: path.to_path_buf(),
            entry_point: elf.entry,
            machine: goblin::elf::header::machine_to_str(elf.header.e_machine).to_string(),
            is_64bit: elf.is_64,
            little_endian: elf.little_endian,
        };

        log::debug!(
            "Target image {}: {} {}-bit, entry {:#x}",
            path.display(),
            image.machine,
            if image.is_64bit { 64 } else { 32 },
            image.entry_point
        );
        Ok(image)
    }
}
