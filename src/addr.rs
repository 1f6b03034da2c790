//! Textual PLC address parsing and the canonical cell key.
//!
//! Addresses look like `%MW100`, `%MB6`, `%MX8.0`, `%MD0`, `%IX0.0`. The
//! leading sigil is optional, the two base letters are case-insensitive.
//! Two addresses denote the same physical cell iff their canonical keys
//! are equal.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage class of an address.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Base {
    /// `MW` — 16-bit holding register.
    Word,
    /// `MB` — one half of a holding register, even index = low byte.
    Byte,
    /// `MX` — single bit inside a byte.
    Bit,
    /// `MD` — 32-bit value spanning a register pair.
    DoubleWord,
    /// `IX` — discrete input, read-only by nature.
    DiscreteInput,
}

impl Base {
    pub fn letters(self) -> &'static str {
        match self {
            Base::Word => "MW",
            Base::Byte => "MB",
            Base::Bit => "MX",
            Base::DoubleWord => "MD",
            Base::DiscreteInput => "IX",
        }
    }

    fn from_letters(letters: &str) -> Option<Base> {
        match letters {
            "MW" => Some(Base::Word),
            "MB" => Some(Base::Byte),
            "MX" => Some(Base::Bit),
            "MD" => Some(Base::DoubleWord),
            "IX" => Some(Base::DiscreteInput),
            _ => None,
        }
    }
}

/// Word ordering of a `DoubleWord` across its register pair.
///
/// Not protocol-mandated; device configuration decides. Low-word-first is
/// what the target PLCs ship with.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum WordOrder {
    #[default]
    LowFirst,
    HighFirst,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("unknown address base in '{0}'")]
    UnknownBase(String),

    #[error("invalid address '{0}'")]
    Invalid(String),

    #[error("bit index {0} out of range (0..=7)")]
    BitOutOfRange(u8),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Address {
    pub base: Base,
    pub index: u16,
    pub sub_bit: Option<u8>,
}

impl Address {
    pub fn new(base: Base, index: u16, sub_bit: Option<u8>) -> Address {
        Address {
            base,
            index,
            sub_bit,
        }
    }

    /// Parse `%MW100` / `mx8.0` style text.
    pub fn parse(text: &str) -> Result<Address, AddressError> {
        let s = text.trim();
        let s = s.strip_prefix('%').unwrap_or(s);

        let (cell, sub_bit) = match s.split_once('.') {
            Some((cell, bit)) => {
                let bit: u8 = bit
                    .parse()
                    .map_err(|_| AddressError::Invalid(text.to_string()))?;
                if bit > 7 {
                    return Err(AddressError::BitOutOfRange(bit));
                }
                (cell, Some(bit))
            }
            None => (s, None),
        };

        if cell.len() < 3 || !cell.is_char_boundary(2) {
            return Err(AddressError::Invalid(text.to_string()));
        }
        let letters = cell[..2].to_ascii_uppercase();
        let base = Base::from_letters(&letters)
            .ok_or_else(|| AddressError::UnknownBase(text.to_string()))?;
        let index: u16 = cell[2..]
            .parse()
            .map_err(|_| AddressError::Invalid(text.to_string()))?;

        // Only bit-granular bases carry a `.bit` suffix.
        if sub_bit.is_some() && !matches!(base, Base::Bit | Base::DiscreteInput) {
            return Err(AddressError::Invalid(text.to_string()));
        }

        Ok(Address {
            base,
            index,
            sub_bit,
        })
    }

    /// Canonical registry key, e.g. `MW100` or `MX8.0`.
    pub fn canonical_key(&self) -> String {
        match self.sub_bit {
            None => format!("{}{}", self.base.letters(), self.index),
            Some(bit) => format!("{}{}.{}", self.base.letters(), self.index, bit),
        }
    }

    /// Holding-register index backing a `Byte`/`Bit` address.
    pub fn parent_word_index(&self) -> u16 {
        self.index / 2
    }

    /// Whether a `Byte`/`Bit` address sits in the high half of its word.
    pub fn is_high_half(&self) -> bool {
        self.index % 2 == 1
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.canonical_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_vectors_cover_bases_and_forms() {
        struct Case {
            text: &'static str,
            expected: Address,
            key: &'static str,
        }

        let cases = vec![
            Case {
                text: "%MW100",
                expected: Address::new(Base::Word, 100, None),
                key: "MW100",
            },
            Case {
                text: "MB6",
                expected: Address::new(Base::Byte, 6, None),
                key: "MB6",
            },
            Case {
                text: "%MX8.0",
                expected: Address::new(Base::Bit, 8, Some(0)),
                key: "MX8.0",
            },
            Case {
                text: "%md0",
                expected: Address::new(Base::DoubleWord, 0, None),
                key: "MD0",
            },
            Case {
                text: "%IX0.3",
                expected: Address::new(Base::DiscreteInput, 0, Some(3)),
                key: "IX0.3",
            },
            Case {
                text: "  %mw2  ",
                expected: Address::new(Base::Word, 2, None),
                key: "MW2",
            },
        ];

        for case in cases {
            let addr = Address::parse(case.text).unwrap();
            assert_eq!(addr, case.expected, "parse {}", case.text);
            assert_eq!(addr.canonical_key(), case.key, "key {}", case.text);
        }
    }

    #[test]
    fn parse_rejects_malformed_addresses() {
        assert!(matches!(
            Address::parse("%ZZ1"),
            Err(AddressError::UnknownBase(_))
        ));
        assert!(matches!(
            Address::parse("%MWabc"),
            Err(AddressError::Invalid(_))
        ));
        assert!(matches!(
            Address::parse("%MW"),
            Err(AddressError::Invalid(_))
        ));
        assert!(matches!(
            Address::parse("%MX8.9"),
            Err(AddressError::BitOutOfRange(9))
        ));
        assert!(matches!(
            Address::parse("%MX8.x"),
            Err(AddressError::Invalid(_))
        ));
    }

    #[test]
    fn bit_suffix_is_rejected_on_word_sized_bases() {
        for text in ["%MW2.5", "%MB4.1", "%MD0.0"] {
            assert!(
                matches!(Address::parse(text), Err(AddressError::Invalid(_))),
                "{text}"
            );
        }
    }

    #[test]
    fn byte_addresses_map_to_parent_word_halves() {
        let low = Address::parse("%MB4").unwrap();
        let high = Address::parse("%MB5").unwrap();
        assert_eq!(low.parent_word_index(), 2);
        assert_eq!(high.parent_word_index(), 2);
        assert!(!low.is_high_half());
        assert!(high.is_high_half());
    }

    #[test]
    fn same_cell_iff_same_canonical_key() {
        let a = Address::parse("%MW2").unwrap();
        let b = Address::parse("mw2").unwrap();
        let c = Address::parse("%MW3").unwrap();
        assert_eq!(a.canonical_key(), b.canonical_key());
        assert_ne!(a.canonical_key(), c.canonical_key());
    }
}
