//! Word: the universal 11 digit, base-8 tagged value.
//!
//! digit 0: sign family (0 non-negative, 3 negative)
//! digit 1: kind tag for references, top magnitude digit for numbers
//! digit 2..=10: 27 bit magnitude, always a heap address for references
//!
//! Numbers use the same shape, see [`crate::Numero`].
use std::fmt;

use crate::{Numero, RuntimeError, VmResult};

pub const WIDTH: usize = 11;

/// Size of the address field, 2^27.
pub const ADDRESS_SPACE: i64 = 1 << 27;
pub const MAX_ADDRESS: i64 = ADDRESS_SPACE - 1;
/// A raw word is 10 octal digits at most, 2^30 - 1.
pub const MAX_RAW: i64 = (1 << 30) - 1;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Sign {
    Positive,
    Negative,
}

/// What a reference points at. The discriminant is the digit stored in
/// position 1 of the word.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RefKind {
    Ascii = 1,
    Method = 2,
    Array = 3,
    Class = 4,
    Object = 5,
    External = 6,
}

/// A word is either a number with a sign or a typed reference, never both.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Kind {
    Number(Sign),
    Reference(RefKind),
}

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Word {
    digits: [u8; WIDTH],
}

/// An address into the heap, taken from the low 27 bits of a reference.
///
/// Addresses below [`Address::WORD_BASE`] are in the byte arena, everything
/// else is in the word arena.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u32);

impl RefKind {
    pub fn from_digit(digit: u8) -> Option<Self> {
        let kind = match digit {
            1 => Self::Ascii,
            2 => Self::Method,
            3 => Self::Array,
            4 => Self::Class,
            5 => Self::Object,
            6 => Self::External,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ascii => "ascii",
            Self::Method => "method",
            Self::Array => "array",
            Self::Class => "class",
            Self::Object => "object",
            Self::External => "external",
        }
    }

    /// Rows live in the word arena, blobs in the byte arena.
    pub fn is_row(self) -> bool {
        matches!(self, Self::Array | Self::Class | Self::Object)
    }
}

impl Word {
    /// All digits zero: the integer 0 and the null reference.
    pub const NULL: Word = Word {
        digits: [0; WIDTH],
    };

    /// Build a word from a plain non-negative integer, e.g. a cell that was
    /// read back from storage.
    pub fn from_raw(value: i64) -> VmResult<Self> {
        if !(0..=MAX_RAW).contains(&value) {
            return Err(RuntimeError::OutOfRange {
                value,
                min: 0,
                max: MAX_RAW,
            });
        }
        Ok(Self {
            digits: encode_octal(value as u32),
        })
    }

    /// Build a reference of `kind` to `address`.
    pub fn reference(kind: RefKind, address: u32) -> VmResult<Self> {
        if i64::from(address) > MAX_ADDRESS {
            return Err(RuntimeError::OutOfRange {
                value: i64::from(address),
                min: 0,
                max: MAX_ADDRESS,
            });
        }
        let mut digits = encode_octal(address);
        digits[1] = kind as u8;
        Ok(Self { digits })
    }

    pub(crate) const fn from_digits(digits: [u8; WIDTH]) -> Self {
        Self { digits }
    }

    #[inline]
    pub(crate) fn digits(&self) -> [u8; WIDTH] {
        self.digits
    }

    #[inline]
    pub(crate) fn digit(&self, index: usize) -> u8 {
        self.digits[index]
    }

    /// All 11 digits read as one base-8 number.
    pub fn to_raw(self) -> i64 {
        self.digits
            .iter()
            .fold(0i64, |acc, &digit| acc * 8 + i64::from(digit))
    }

    /// The 27 bit address field, with the tag and sign stripped.
    pub fn address(self) -> Address {
        Address((self.to_raw() % ADDRESS_SPACE) as u32)
    }

    pub fn kind(self) -> Kind {
        if self.digits[0] == 3 {
            return Kind::Number(Sign::Negative);
        }
        match RefKind::from_digit(self.digits[1]) {
            Some(kind) => Kind::Reference(kind),
            None if self.digits[1] == 7 => Kind::Number(Sign::Negative),
            None => Kind::Number(Sign::Positive),
        }
    }

    pub fn ref_kind(self) -> Option<RefKind> {
        match self.kind() {
            Kind::Reference(kind) => Some(kind),
            Kind::Number(_) => None,
        }
    }

    pub fn is_reference(self) -> bool {
        self.ref_kind().is_some()
    }

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }

    /// Reinterpret the digits as a signed number.
    pub fn to_numero(self) -> Numero {
        Numero::from_word(self)
    }

    /// Check that this word is a reference of `kind`.
    pub fn expect_kind(self, kind: RefKind) -> VmResult<Self> {
        if self.ref_kind() == Some(kind) {
            Ok(self)
        } else {
            Err(RuntimeError::TypeError {
                expected: kind.name(),
                got: self,
            })
        }
    }
}

// writes digits 1..=10, digit 0 stays zero
fn encode_octal(mut value: u32) -> [u8; WIDTH] {
    let mut digits = [0u8; WIDTH];
    for position in (1..WIDTH).rev() {
        if value == 0 {
            break;
        }
        digits[position] = (value % 8) as u8;
        value /= 8;
    }
    digits
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for digit in self.digits {
            write!(f, "{digit}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Word({self})")
    }
}

impl From<Numero> for Word {
    fn from(value: Numero) -> Self {
        value.as_word()
    }
}

impl Address {
    pub const WORD_BASE: u32 = 1 << 16;

    pub(crate) const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn in_byte_arena(self) -> bool {
        self.0 < Self::WORD_BASE
    }

    pub(crate) fn offset(self, by: usize) -> Option<Self> {
        let by = u32::try_from(by).ok()?;
        self.0.checked_add(by).map(Self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_keeps_kind_and_address() {
        let word = Word::reference(RefKind::Method, 0o1234).expect("valid reference");
        assert_eq!(word.to_string(), "02000001234");
        assert_eq!(word.address().get(), 0o1234);
        assert_eq!(word.kind(), Kind::Reference(RefKind::Method));
        assert!(word.is_reference());
    }

    #[test]
    fn reference_rejects_addresses_past_27_bits() {
        let err = Word::reference(RefKind::Ascii, 1 << 27).unwrap_err();
        assert!(
            matches!(err, RuntimeError::OutOfRange { .. }),
            "expected out of range, got {err:?}"
        );
    }

    #[test]
    fn raw_round_trip_covers_full_30_bits() {
        for value in [0, 1, 7, 8, 65536, MAX_ADDRESS, MAX_RAW] {
            let word = Word::from_raw(value).expect("in range");
            assert_eq!(word.to_raw(), value);
        }
        assert!(Word::from_raw(-1).is_err());
        assert!(Word::from_raw(MAX_RAW + 1).is_err());
    }

    #[test]
    fn address_strips_the_type_tag() {
        let word = Word::reference(RefKind::Object, 70_000).expect("valid reference");
        let raw = Word::from_raw(word.to_raw()).expect("in range");
        assert_eq!(raw, word, "raw round trip must keep the tag digit");
        assert_eq!(raw.address().get(), 70_000);
        assert!(!raw.address().in_byte_arena());
    }

    #[test]
    fn null_is_a_positive_number() {
        assert!(Word::NULL.is_null());
        assert_eq!(Word::NULL.kind(), Kind::Number(Sign::Positive));
        assert_eq!(Word::NULL.address().get(), 0);
    }

    #[test]
    fn expect_kind_reports_mismatch() {
        let word = Word::reference(RefKind::Array, 65536).expect("valid reference");
        assert!(word.expect_kind(RefKind::Array).is_ok());
        let err = word.expect_kind(RefKind::Class).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::TypeError {
                expected: "class",
                got: word
            }
        );
    }
}
