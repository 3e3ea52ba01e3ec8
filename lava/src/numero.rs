//! Signed integers on top of [`Word`].
//!
//! Digits 1..=10 hold a 30 bit two's complement value, digit 0 the sign
//! family. Arithmetic works on a widened scratch copy whose digits may leave
//! 0..=7 and is then repaired by [`charm`].
use std::{
    fmt,
    ops::{Add, Mul, Neg, Sub},
};

use crate::{
    Comparison, RuntimeError, VmResult, Word,
    tagged::{ADDRESS_SPACE, WIDTH},
};

/// Digits while an operation is in flight.
type Scratch = [i16; WIDTH];

const LAST: usize = WIDTH - 1;
const NEGATIVE: u8 = 3;

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Numero(Word);

impl Numero {
    pub const MIN: i64 = -ADDRESS_SPACE;
    pub const MAX: i64 = ADDRESS_SPACE - 1;

    pub const ZERO: Numero = Numero(Word::NULL);
    pub const ONE: Numero = Numero(Word::from_digits([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]));
    pub const TWO: Numero = Numero(Word::from_digits([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]));

    pub fn new(value: i64) -> VmResult<Self> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(RuntimeError::OutOfRange {
                value,
                min: Self::MIN,
                max: Self::MAX,
            });
        }
        // remainders keep the sign of `value`, charm turns them into
        // two's complement digits
        let mut raw: Scratch = [0; WIDTH];
        let mut rest = value;
        for position in (0..WIDTH).rev() {
            if rest == 0 {
                break;
            }
            raw[position] = (rest % 8) as i16;
            rest /= 8;
        }
        Ok(charm(raw))
    }

    pub(crate) fn from_word(word: Word) -> Self {
        Self(word)
    }

    #[inline]
    pub fn as_word(self) -> Word {
        self.0
    }

    pub fn to_i64(self) -> i64 {
        if self.sign_digit() < 2 {
            magnitude(self)
        } else {
            -magnitude(self.negate())
        }
    }

    #[inline]
    fn sign_digit(self) -> u8 {
        self.0.digit(0)
    }

    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }

    pub fn is_positive(self) -> bool {
        !self.is_zero() && self.sign_digit() == 0
    }

    pub fn is_negative(self) -> bool {
        self.sign_digit() == NEGATIVE
    }

    pub fn is_odd(self) -> bool {
        self.0.digit(LAST) % 2 == 1
    }

    /// One's complement of every digit, +1, then charm.
    pub fn negate(self) -> Self {
        let digits = self.0.digits();
        let mut raw: Scratch = [0; WIDTH];
        raw[0] = i16::from(NEGATIVE) - i16::from(digits[0]);
        for position in 1..WIDTH {
            raw[position] = 7 - i16::from(digits[position]);
        }
        raw[LAST] += 1;
        charm(raw)
    }

    /// Digit-wise sum without carries, carries are left to charm.
    pub fn add(self, rhs: Self) -> Self {
        let mut raw = widen(self);
        for (digit, other) in raw.iter_mut().zip(rhs.0.digits()) {
            *digit += i16::from(other);
        }
        charm(raw)
    }

    pub fn sub(self, rhs: Self) -> Self {
        self.add(rhs.negate())
    }

    /// Add one to the lowest digit, the fast path of `iinc 1`.
    pub fn increment(self) -> Self {
        let mut raw = widen(self);
        raw[LAST] += 1;
        charm(raw)
    }

    pub fn double(self) -> Self {
        self.add(self)
    }

    /// Shift right by one bit, rounding toward zero.
    pub fn halve(self) -> Self {
        if self.is_negative() {
            return self.negate().halve().negate();
        }
        let mut raw: Scratch = [0; WIDTH];
        let mut dropped = 0;
        for (position, digit) in self.0.digits().into_iter().enumerate() {
            let value = i16::from(digit) + dropped * 8;
            raw[position] = value / 2;
            dropped = value % 2;
        }
        charm(raw)
    }

    /// Shift-and-add multiplication.
    pub fn mul(self, rhs: Self) -> Self {
        let (mut multiplicand, mut multiplier) = if rhs.is_negative() {
            (self.negate(), rhs.negate())
        } else {
            (self, rhs)
        };
        let mut product = Self::ZERO;
        while multiplier.is_positive() {
            if multiplier.is_odd() {
                product = product.add(multiplicand);
            }
            multiplicand = multiplicand.double();
            multiplier = multiplier.halve();
        }
        product
    }

    /// Quotient and remainder of two non-negative numbers.
    ///
    /// Dividing by zero yields `(0, 0)`.
    pub fn div_rem(self, divisor: Self) -> VmResult<(Self, Self)> {
        if self.is_negative() || divisor.is_negative() {
            return Err(RuntimeError::NegativeDivision);
        }
        if self.is_zero() || divisor.is_zero() {
            return Ok((Self::ZERO, Self::ZERO));
        }
        if self == divisor {
            return Ok((Self::ONE, Self::ZERO));
        }
        if self.compare(divisor) == Comparison::LT {
            return Ok((Self::ZERO, self));
        }
        if divisor == Self::ONE {
            return Ok((self, Self::ZERO));
        }
        if divisor == Self::TWO {
            let remainder = if self.is_odd() { Self::ONE } else { Self::ZERO };
            return Ok((self.halve(), remainder));
        }

        let mut scaled = divisor;
        let mut quotient = Self::ONE;
        let mut rollback = (divisor, Self::ONE);
        while scaled.compare(self).satisfies(Comparison::LE) {
            scaled = scaled.double();
            quotient = quotient.double();
            if scaled.compare(self).satisfies(Comparison::LE) {
                rollback = (scaled, quotient);
            }
        }
        let (scaled, quotient) = rollback;
        let (rest, remainder) = self.sub(scaled).div_rem(divisor)?;
        Ok((quotient.add(rest), remainder))
    }

    /// Trichotomy of `self - other`.
    pub fn compare(self, other: Self) -> Comparison {
        let difference = self.sub(other);
        if difference.is_positive() {
            Comparison::GT
        } else if difference.is_zero() {
            Comparison::EQ
        } else {
            Comparison::LT
        }
    }
}

fn widen(value: Numero) -> Scratch {
    value.0.digits().map(i16::from)
}

/// Carry/borrow pass, right to left, then fold the sign digit back into
/// `{0, 1, 3}` with a single +-4.
fn charm(mut raw: Scratch) -> Numero {
    for position in (1..WIDTH).rev() {
        while raw[position] < 0 {
            raw[position] += 8;
            raw[position - 1] -= 1;
        }
        while raw[position] > 7 {
            raw[position] -= 8;
            raw[position - 1] += 1;
        }
    }
    if raw[0] < 0 {
        raw[0] += 4;
    } else if raw[0] > 3 {
        raw[0] -= 4;
    }
    debug_assert!(
        (0..=7).contains(&raw[0]),
        "sign digit {} left the octal range",
        raw[0]
    );
    Numero(Word::from_digits(raw.map(|digit| digit as u8)))
}

// digits 1..=10, a sign digit of 1 counts as one more octal place
fn magnitude(value: Numero) -> i64 {
    let digits = value.0.digits();
    let low = digits[1..]
        .iter()
        .fold(0i64, |acc, &digit| acc * 8 + i64::from(digit));
    if digits[0] == 1 { low + (1 << 30) } else { low }
}

impl TryFrom<i64> for Numero {
    type Error = RuntimeError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<i8> for Numero {
    fn from(value: i8) -> Self {
        Self::new(i64::from(value)).unwrap_or(Self::ZERO)
    }
}

impl From<i16> for Numero {
    fn from(value: i16) -> Self {
        Self::new(i64::from(value)).unwrap_or(Self::ZERO)
    }
}

impl Add for Numero {
    type Output = Numero;
    fn add(self, rhs: Self) -> Self::Output {
        Numero::add(self, rhs)
    }
}

impl Sub for Numero {
    type Output = Numero;
    fn sub(self, rhs: Self) -> Self::Output {
        Numero::sub(self, rhs)
    }
}

impl Mul for Numero {
    type Output = Numero;
    fn mul(self, rhs: Self) -> Self::Output {
        Numero::mul(self, rhs)
    }
}

impl Neg for Numero {
    type Output = Numero;
    fn neg(self) -> Self::Output {
        self.negate()
    }
}

impl fmt::Display for Numero {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_i64())
    }
}

impl fmt::Debug for Numero {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Numero({} = {})", self.to_i64(), self.0)
    }
}
