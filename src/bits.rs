//! Fixed-width sub-fields of 32-bit register values.

/// A `width`-bit field starting at bit `offset` of a 32-bit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub offset: u32,
    pub width: u32,
}

impl BitField {
    pub const fn new(offset: u32, width: u32) -> Self {
        Self { offset, width }
    }

    pub const fn mask(self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            ((1u32 << self.width) - 1) << self.offset
        }
    }

    pub const fn max(self) -> u32 {
        self.mask() >> self.offset
    }

    pub const fn get(self, register: u32) -> u32 {
        (register & self.mask()) >> self.offset
    }

    /// Replace the field in `register`. Bits of `value` beyond the field width are dropped.
    pub const fn set(self, register: u32, value: u32) -> u32 {
        (register & !self.mask()) | ((value << self.offset) & self.mask())
    }

    pub const fn get_bool(self, register: u32) -> bool {
        self.get(register) != 0
    }

    pub const fn set_bool(self, register: u32, value: bool) -> u32 {
        self.set(register, value as u32)
    }

    /// Whether `value` fits in the field.
    pub const fn fits(self, value: u32) -> bool {
        value <= self.max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_and_set() {
        let field = BitField::new(6, 8);
        let reg = field.set(0xFFFF_FFFF, 0x12);
        assert_eq!(field.get(reg), 0x12);
        assert_eq!(reg & !field.mask(), 0xFFFF_FFFF & !field.mask());
        assert_eq!(field.max(), 0xFF);
    }

    #[test]
    fn set_truncates_to_width() {
        let field = BitField::new(0, 2);
        assert_eq!(field.set(0, 0x7), 0x3);
        assert!(!field.fits(4));
        assert!(field.fits(3));
    }

    #[test]
    fn full_width_field() {
        let field = BitField::new(0, 32);
        assert_eq!(field.mask(), u32::MAX);
        assert_eq!(field.set(0, 0xDEAD_BEEF), 0xDEAD_BEEF);
    }

    #[test]
    fn bool_fields() {
        let flag = BitField::new(14, 1);
        let reg = flag.set_bool(0, true);
        assert_eq!(reg, 1 << 14);
        assert!(flag.get_bool(reg));
        assert!(!flag.get_bool(flag.set_bool(reg, false)));
    }
}
