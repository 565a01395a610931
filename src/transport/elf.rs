//! Locating the RTT control block through the firmware symbol table

use std::path::Path;
use tracing::{debug, info};

use crate::error::RttError;

/// Symbol under which SEGGER RTT places its control block
pub const RTT_SYMBOL_NAME: &str = "_SEGGER_RTT";

/// Find the address of `_SEGGER_RTT` in an ELF image on disk
pub fn find_control_block(elf_path: &Path) -> Result<u64, RttError> {
    debug!("Looking up {} in {}", RTT_SYMBOL_NAME, elf_path.display());

    let elf_data = std::fs::read(elf_path).map_err(|e| {
        RttError::SymbolLookupFailed(format!("failed to read {}: {}", elf_path.display(), e))
    })?;
    find_control_block_in(&elf_data).map_err(|e| match e {
        RttError::SymbolLookupFailed(reason) => {
            RttError::SymbolLookupFailed(format!("{}: {}", elf_path.display(), reason))
        }
        other => other,
    })
}

/// Find the address of `_SEGGER_RTT` in an in-memory ELF image
pub fn find_control_block_in(elf_data: &[u8]) -> Result<u64, RttError> {
    let elf = goblin::elf::Elf::parse(elf_data)
        .map_err(|e| RttError::SymbolLookupFailed(format!("not a valid ELF file: {}", e)))?;

    let address = elf
        .syms
        .iter()
        .find(|sym| elf.strtab.get_at(sym.st_name) == Some(RTT_SYMBOL_NAME))
        .map(|sym| sym.st_value);

    match address {
        Some(address) => {
            info!("Found {} at 0x{:08X}", RTT_SYMBOL_NAME, address);
            Ok(address)
        }
        None => Err(RttError::SymbolLookupFailed(format!(
            "{} not found in {} symbols; RTT may be disabled or the image stripped",
            RTT_SYMBOL_NAME,
            elf.syms.len()
        ))),
    }
}
