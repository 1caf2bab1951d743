//! The disassembler collaborator.

use ilr_isa::{Arch, Instruction, parse_listing};
use rustc_hash::FxHashMap;

use crate::{Error, Result};

/// Decodes the machine code of one method body.
///
/// Implementations are shared across the threads of a batch.
pub trait Disassembler: Send + Sync {
    /// Decode `code`, which starts at `address`, into instructions in address
    /// order.
    fn disassemble(&self, arch: Arch, address: u64, code: &[u8]) -> Result<Vec<Instruction>>;
}

impl<F> Disassembler for F
where
    F: Fn(Arch, u64, &[u8]) -> Result<Vec<Instruction>> + Send + Sync,
{
    fn disassemble(&self, arch: Arch, address: u64, code: &[u8]) -> Result<Vec<Instruction>> {
        self(arch, address, code)
    }
}

/// Serves methods from textual listings produced ahead of time by an
/// external disassembler, one listing per method start.
#[derive(Clone, Debug, Default)]
pub struct TextListing {
    listings: FxHashMap<u64, String>,
}

impl TextListing {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the listing of the method starting at `address`.
    #[must_use]
    pub fn with(mut self, address: u64, listing: impl Into<String>) -> Self {
        self.insert(address, listing);
        self
    }

    pub fn insert(&mut self, address: u64, listing: impl Into<String>) {
        self.listings.insert(address, listing.into());
    }
}

impl Disassembler for TextListing {
    fn disassemble(&self, arch: Arch, address: u64, code: &[u8]) -> Result<Vec<Instruction>> {
        let listing = self.listings.get(&address).ok_or_else(|| Error::Disassembly {
            address,
            message: "no listing for method".to_string(),
        })?;
        let end = address + code.len() as u64;
        let mut instructions = parse_listing(arch, listing)?;
        instructions.retain(|instr| instr.address >= address && instr.address < end);
        Ok(instructions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_is_cut_to_the_code_range() {
        let listing = TextListing::new().with(0x1000, "0x1000 nop\n0x1001 ret\n0x1002 nop");
        let instructions = listing.disassemble(Arch::X86_64, 0x1000, &[0x90, 0xc3]).unwrap();
        assert_eq!(instructions.len(), 2);
        assert!(instructions[1].is_return());
    }

    #[test]
    fn test_missing_listing() {
        let err = TextListing::new().disassemble(Arch::Arm64, 0x40, &[0; 4]).unwrap_err();
        assert!(matches!(err, Error::Disassembly { address: 0x40, .. }));
    }

    #[test]
    fn test_closure_disassembler() {
        let empty = |_: Arch, _: u64, _: &[u8]| -> Result<Vec<Instruction>> { Ok(Vec::new()) };
        assert!(empty.disassemble(Arch::X86, 0, &[]).unwrap().is_empty());
    }
}
