use bitflags::bitflags;

bitflags! {
    /// Result of a trichotomy compare, and the mask a branch tests it with.
    ///
    /// A compare yields exactly one of `GT`, `EQ` or `LT`. A branch with
    /// mask `m` is taken iff `result & m != 0`, so `GE`, `LE` and `NE` need
    /// no extra comparison primitive.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Comparison: u8 {
        const GT = 1;
        const EQ = 1 << 1;
        const LT = 1 << 2;
        const GE = Self::GT.bits() | Self::EQ.bits();
        const LE = Self::LT.bits() | Self::EQ.bits();
        const NE = Self::GT.bits() | Self::LT.bits();
    }
}

impl Comparison {
    #[inline]
    pub fn satisfies(self, test: Comparison) -> bool {
        self.intersects(test)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_have_the_wire_values() {
        assert_eq!(Comparison::GT.bits(), 1);
        assert_eq!(Comparison::EQ.bits(), 2);
        assert_eq!(Comparison::GE.bits(), 3);
        assert_eq!(Comparison::LT.bits(), 4);
        assert_eq!(Comparison::NE.bits(), 5);
        assert_eq!(Comparison::LE.bits(), 6);
    }

    #[test]
    fn composite_tests_accept_their_parts() {
        assert!(Comparison::GT.satisfies(Comparison::GE));
        assert!(Comparison::EQ.satisfies(Comparison::GE));
        assert!(!Comparison::LT.satisfies(Comparison::GE));
        assert!(Comparison::LT.satisfies(Comparison::NE));
        assert!(!Comparison::EQ.satisfies(Comparison::NE));
        assert!(Comparison::EQ.satisfies(Comparison::LE));
    }
}
