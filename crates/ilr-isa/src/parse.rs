//! Build instructions from disassembler text output.
//!
//! Most disassemblers expose a mnemonic plus an Intel/ARM operand string
//! (`qword ptr [rcx + 0x18]`, `x0, [x1, #0x10]!`). This module turns that
//! text into the structured [`Operand`] model.

use crate::{Arch, Instruction, IsaError, MAX_OPERANDS, MemoryOperand, Operand, Register, Result};

/// Parse one instruction from its mnemonic and operand string.
///
/// # Errors
///
/// Returns an error if an operand cannot be understood.
pub fn parse_instruction(
    arch: Arch,
    address: u64,
    size: u8,
    mnemonic: &str,
    op_str: &str,
) -> Result<Instruction> {
    let mut operands: Vec<Operand> = Vec::new();
    let mut width = 0u8;

    for token in split_operands(op_str) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        if let Some(shift) = parse_shift_modifier(token) {
            // `#imm, lsl #12` scales the preceding immediate; register shifts
            // and extends are not modeled. `movk` keeps the shift as its own
            // operand since a zero halfword still names a position.
            let Some(amount) = shift else {
                continue;
            };
            if mnemonic.eq_ignore_ascii_case("movk") {
                operands.push(Operand::Immediate(i64::from(amount)));
            } else if let Some(Operand::Immediate(imm)) = operands.last_mut() {
                *imm = imm.checked_shl(amount).unwrap_or(*imm);
            }
            continue;
        }
        let (token, prefix_width) = strip_size_prefix(token);
        if width == 0 {
            width = prefix_width;
        }
        let operand = parse_operand(arch, token)?;
        if width == 0 {
            if let Operand::Register(_) = operand {
                if let Some((_, w)) = Register::parse(arch, token) {
                    width = w;
                }
            }
        }
        operands.push(operand);
    }

    if operands.len() > MAX_OPERANDS {
        return Err(IsaError::TooManyOperands(operands.len()));
    }
    Ok(Instruction::new(arch, address, size, mnemonic, operands, width))
}

/// Parse a textual listing, one instruction per line: `address mnemonic operands`.
///
/// Instruction sizes are derived from the distance to the next address; the
/// last instruction gets the architecture's minimum size. Blank lines and
/// lines starting with `;` or `//` are skipped.
///
/// # Errors
///
/// Returns an error for malformed addresses or operands.
pub fn parse_listing(arch: Arch, listing: &str) -> Result<Vec<Instruction>> {
    let mut rows = Vec::new();
    for line in listing.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with("//") {
            continue;
        }
        let (addr, rest) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| IsaError::MalformedOperand(line.to_string()))?;
        let addr = addr.trim_end_matches(':');
        let address = parse_number(addr)
            .ok_or_else(|| IsaError::MalformedImmediate(addr.to_string()))? as u64;
        let rest = rest.trim();
        let (mnemonic, ops) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        rows.push((address, mnemonic.to_string(), ops.to_string()));
    }

    let min_size: u8 = if arch.is_x86() { 1 } else { 4 };
    let mut instructions = Vec::with_capacity(rows.len());
    for (i, (address, mnemonic, ops)) in rows.iter().enumerate() {
        let size = rows
            .get(i + 1)
            .and_then(|(next, _, _)| u8::try_from(next.saturating_sub(*address)).ok())
            .filter(|s| *s > 0)
            .unwrap_or(min_size);
        instructions.push(parse_instruction(arch, *address, size, mnemonic, ops)?);
    }
    Ok(instructions)
}

/// Split at commas that are not inside brackets.
fn split_operands(op_str: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in op_str.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&op_str[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&op_str[start..]);
    parts
}

/// Returns `Some(Some(n))` for `lsl #n`, `Some(None)` for other modifiers.
fn parse_shift_modifier(token: &str) -> Option<Option<u32>> {
    let lower = token.to_ascii_lowercase();
    let (kind, amount) = lower.split_once(' ').unwrap_or((lower.as_str(), ""));
    match kind {
        "lsl" => Some(parse_number(amount.trim()).and_then(|n| u32::try_from(n).ok())),
        "lsr" | "asr" | "ror" | "sxtw" | "uxtw" | "sxtx" | "uxtx" | "sxth" | "uxth" | "sxtb"
        | "uxtb" => Some(None),
        _ => None,
    }
}

fn strip_size_prefix(token: &str) -> (&str, u8) {
    const PREFIXES: [(&str, u8); 8] = [
        ("byte ptr", 1),
        ("word ptr", 2),
        ("dword ptr", 4),
        ("qword ptr", 8),
        ("tbyte ptr", 10),
        ("xmmword ptr", 16),
        ("ymmword ptr", 32),
        ("ptr", 0),
    ];
    let lower = token.to_ascii_lowercase();
    for (prefix, width) in PREFIXES {
        if lower.starts_with(prefix) {
            return (token[prefix.len()..].trim(), width);
        }
    }
    (token, 0)
}

fn parse_operand(arch: Arch, token: &str) -> Result<Operand> {
    // Segment overrides (`gs:[0x58]`) keep only the memory part.
    let token = match token.split_once(':') {
        Some((segment, rest)) if arch.is_x86() && segment.len() == 2 && rest.starts_with('[') => {
            rest
        }
        _ => token,
    };
    let token = token.trim_end_matches('!');

    if let Some(inner) = token.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        let mem = if arch.is_x86() {
            parse_x86_memory(arch, inner)?
        } else {
            parse_arm64_memory(arch, inner)?
        };
        return Ok(Operand::Memory(mem));
    }
    if let Some((reg, _)) = Register::parse(arch, token) {
        return Ok(Operand::Register(reg));
    }
    parse_number(token)
        .map(Operand::Immediate)
        .ok_or_else(|| IsaError::MalformedOperand(token.to_string()))
}

fn parse_x86_memory(arch: Arch, inner: &str) -> Result<MemoryOperand> {
    let mut mem = MemoryOperand {
        base: None,
        index: None,
        scale: 1,
        displacement: 0,
    };
    let normalized = inner.replace('-', "+-");
    for term in normalized.split('+') {
        let term = term.trim();
        if term.is_empty() {
            continue;
        }
        if let Some((a, b)) = term.split_once('*') {
            let (reg, scale) = match (Register::parse(arch, a.trim()), Register::parse(arch, b.trim())) {
                (Some((reg, _)), _) => (reg, b.trim()),
                (_, Some((reg, _))) => (reg, a.trim()),
                _ => return Err(IsaError::MalformedOperand(inner.to_string())),
            };
            mem.index = Some(reg);
            mem.scale = parse_number(scale)
                .and_then(|s| u8::try_from(s).ok())
                .ok_or_else(|| IsaError::MalformedOperand(inner.to_string()))?;
        } else if let Some((reg, _)) = Register::parse(arch, term) {
            if mem.base.is_none() {
                mem.base = Some(reg);
            } else {
                mem.index = Some(reg);
            }
        } else {
            let value = parse_number(term)
                .ok_or_else(|| IsaError::MalformedImmediate(term.to_string()))?;
            mem.displacement = mem.displacement.wrapping_add(value);
        }
    }
    Ok(mem)
}

fn parse_arm64_memory(arch: Arch, inner: &str) -> Result<MemoryOperand> {
    let mut parts = inner.split(',').map(str::trim);
    let base = parts
        .next()
        .and_then(|b| Register::parse(arch, b))
        .map(|(reg, _)| reg)
        .ok_or_else(|| IsaError::MalformedOperand(inner.to_string()))?;
    let mut mem = MemoryOperand::based(base, 0);
    if let Some(second) = parts.next() {
        if let Some((reg, _)) = Register::parse(arch, second) {
            mem.index = Some(reg);
        } else {
            mem.displacement = parse_number(second)
                .ok_or_else(|| IsaError::MalformedImmediate(second.to_string()))?;
        }
    }
    if let Some(third) = parts.next() {
        if let Some(Some(shift)) = parse_shift_modifier(third) {
            mem.scale = 1u8.checked_shl(shift).unwrap_or(1);
        }
    }
    Ok(mem)
}

/// Parse a signed immediate in hex (`0x10`, `#-0x8`, `10h`) or decimal.
#[must_use]
pub fn parse_number(text: &str) -> Option<i64> {
    let text = text.trim().trim_start_matches('#').trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest.trim()),
        None => (false, text),
    };
    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()?
    } else if let Some(hex) = digits.strip_suffix('h').filter(|h| !h.is_empty()) {
        u64::from_str_radix(hex, 16).ok()?
    } else {
        digits.parse::<u64>().ok()?
    };
    let value = value as i64;
    Some(if negative { value.wrapping_neg() } else { value })
}
