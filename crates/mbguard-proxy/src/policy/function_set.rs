//! Function code set compilation and matching.
//!
//! Config entries are bare codes or strings: `"0x10"`, `"16"`, or inclusive
//! ranges such as `"1-4"` and `"0x0F-0x10"`. Codes with the exception bit set
//! are never valid request codes and are rejected.

use mbguard_core::error::{MbGuardError, Result};

use crate::config::FunctionCodeEntry;

/// 256-bit membership set over function codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctionSet {
    bits: [u64; 4],
}

impl FunctionSet {
    pub fn insert(&mut self, code: u8) {
        self.bits[(code >> 6) as usize] |= 1u64 << (code & 63);
    }

    pub fn contains(&self, code: u8) -> bool {
        self.bits[(code >> 6) as usize] & (1u64 << (code & 63)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }

    pub fn intersection(&self, other: &FunctionSet) -> FunctionSet {
        let mut out = FunctionSet::default();
        for (i, w) in out.bits.iter_mut().enumerate() {
            *w = self.bits[i] & other.bits[i];
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0u8..=255).filter(move |c| self.contains(*c))
    }
}

pub fn compile_function_codes(field: &str, raw: &[FunctionCodeEntry]) -> Result<FunctionSet> {
    let mut out = FunctionSet::default();
    for entry in raw {
        let (lo, hi) = match entry {
            FunctionCodeEntry::Code(c) => (*c, *c),
            FunctionCodeEntry::Spec(s) => match s.split_once('-') {
                Some((a, b)) => (parse_code(field, a)?, parse_code(field, b)?),
                None => {
                    let c = parse_code(field, s)?;
                    (c, c)
                }
            },
        };
        if lo > hi {
            return Err(MbGuardError::BadConfig(format!(
                "{field}: empty range {lo:#04x}-{hi:#04x}"
            )));
        }
        for code in lo..=hi {
            check_request_code(field, code)?;
            out.insert(code);
        }
    }
    Ok(out)
}

fn parse_code(field: &str, s: &str) -> Result<u8> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    };
    parsed.map_err(|_| MbGuardError::BadConfig(format!("{field}: invalid function code {s}")))
}

fn check_request_code(field: &str, code: u8) -> Result<()> {
    if code == 0 || code & 0x80 != 0 {
        return Err(MbGuardError::BadConfig(format!(
            "{field}: {code:#04x} is not a request function code (1..=127)"
        )));
    }
    Ok(())
}
