//! Fixed-width C integers with wrapping arithmetic.
//!
//! Every value carries its C type (`width` + signedness). Bits are always
//! masked to the width, so overflow is defined: `1ull << 63` is the unsigned
//! 64-bit value with bit 63 set and `20ll << 63` wraps to `0`.

use std::cmp::Ordering;
use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::ConstantEvalError;

/// Target data model. Decides the width of `long`.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Deserialize,
    Serialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[serde(rename_all = "lowercase")]
#[rkyv(derive(Debug))]
#[repr(u8)]
pub enum DataModel {
    /// 64-bit `long` and pointers (x86_64, arm64).
    #[default]
    Lp64 = 0,
    /// 32-bit `int`, `long` and pointers.
    Ilp32 = 1,
}

impl DataModel {
    /// Width of `long` and of pointers in bits.
    pub fn long_width(self) -> u8 {
        match self {
            DataModel::Lp64 => 64,
            DataModel::Ilp32 => 32,
        }
    }
}

/// A C integer type reduced to what arithmetic needs.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Deserialize,
    Serialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[rkyv(derive(Debug))]
pub struct IntType {
    pub width: u8,
    pub signed: bool,
}

impl IntType {
    pub const CHAR: IntType = IntType::new(8, true);
    pub const INT: IntType = IntType::new(32, true);
    pub const UINT: IntType = IntType::new(32, false);
    pub const LLONG: IntType = IntType::new(64, true);
    pub const ULLONG: IntType = IntType::new(64, false);

    pub const fn new(width: u8, signed: bool) -> Self {
        Self { width, signed }
    }

    pub fn long(model: DataModel) -> Self {
        Self::new(model.long_width(), true)
    }

    pub fn ulong(model: DataModel) -> Self {
        Self::new(model.long_width(), false)
    }

    /// Bit mask covering the type's width.
    pub fn mask(self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }

    /// Largest representable value.
    pub fn max_value(self) -> u64 {
        if self.signed {
            self.mask() >> 1
        } else {
            self.mask()
        }
    }

    /// Integer promotion: anything narrower than `int` becomes `int`.
    pub fn promoted(self) -> Self {
        if self.width < 32 {
            Self::INT
        } else {
            self
        }
    }

    /// Usual arithmetic conversions over two promoted operand types.
    pub fn common(a: IntType, b: IntType) -> IntType {
        let (a, b) = (a.promoted(), b.promoted());
        if a.signed == b.signed {
            return if a.width >= b.width { a } else { b };
        }
        let (unsigned, signed) = if a.signed { (b, a) } else { (a, b) };
        if unsigned.width >= signed.width {
            unsigned
        } else {
            signed
        }
    }
}

impl fmt::Display for IntType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.signed { 's' } else { 'u' };
        write!(f, "{}{}", prefix, self.width)
    }
}

/// A typed integer value. `bits` is always masked to `ty.width`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Deserialize,
    Serialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[rkyv(derive(Debug))]
pub struct CInt {
    bits: u64,
    ty: IntType,
}

impl CInt {
    /// Converts a mathematical value into `ty`, wrapping modulo 2^width.
    pub fn new(value: i128, ty: IntType) -> Self {
        Self::from_bits(value as u64, ty)
    }

    pub fn from_bits(bits: u64, ty: IntType) -> Self {
        Self {
            bits: bits & ty.mask(),
            ty,
        }
    }

    /// A plain `int`.
    pub fn int(value: i64) -> Self {
        Self::new(value as i128, IntType::INT)
    }

    fn boolean(value: bool) -> Self {
        Self::int(value as i64)
    }

    pub fn ty(&self) -> IntType {
        self.ty
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// Mathematical value of the integer under its own type.
    pub fn as_i128(&self) -> i128 {
        if !self.ty.signed {
            return self.bits as i128;
        }
        let shift = 64 - u32::from(self.ty.width.min(64));
        (((self.bits << shift) as i64) >> shift) as i128
    }

    pub fn is_zero(&self) -> bool {
        self.bits == 0
    }

    pub fn is_negative(&self) -> bool {
        self.as_i128() < 0
    }

    pub fn convert(self, ty: IntType) -> Self {
        Self::new(self.as_i128(), ty)
    }

    pub fn promote(self) -> Self {
        self.convert(self.ty.promoted())
    }

    fn balance(self, rhs: CInt) -> (CInt, CInt, IntType) {
        let ty = IntType::common(self.ty, rhs.ty);
        (self.convert(ty), rhs.convert(ty), ty)
    }

    pub fn wrapping_add(self, rhs: CInt) -> CInt {
        let (a, b, ty) = self.balance(rhs);
        CInt::from_bits(a.bits.wrapping_add(b.bits), ty)
    }

    pub fn wrapping_sub(self, rhs: CInt) -> CInt {
        let (a, b, ty) = self.balance(rhs);
        CInt::from_bits(a.bits.wrapping_sub(b.bits), ty)
    }

    pub fn wrapping_mul(self, rhs: CInt) -> CInt {
        let (a, b, ty) = self.balance(rhs);
        CInt::from_bits(a.bits.wrapping_mul(b.bits), ty)
    }

    /// Truncating division. `MIN / -1` wraps.
    pub fn checked_div(self, rhs: CInt) -> Result<CInt, ConstantEvalError> {
        let (a, b, ty) = self.balance(rhs);
        if b.is_zero() {
            return Err(ConstantEvalError::DivisionByZero);
        }
        Ok(CInt::new(a.as_i128() / b.as_i128(), ty))
    }

    pub fn checked_rem(self, rhs: CInt) -> Result<CInt, ConstantEvalError> {
        let (a, b, ty) = self.balance(rhs);
        if b.is_zero() {
            return Err(ConstantEvalError::DivisionByZero);
        }
        Ok(CInt::new(a.as_i128() % b.as_i128(), ty))
    }

    fn shift_count(count: CInt, width: u8) -> Option<u32> {
        let count = count.as_i128();
        if count < 0 || count >= i128::from(width) {
            None
        } else {
            Some(count as u32)
        }
    }

    /// Left shift in the promoted type of `self`. Out-of-range counts give 0.
    pub fn shl(self, count: CInt) -> CInt {
        let lhs = self.promote();
        match Self::shift_count(count, lhs.ty.width) {
            Some(n) => CInt::from_bits(lhs.bits << n, lhs.ty),
            None => CInt::from_bits(0, lhs.ty),
        }
    }

    /// Right shift, arithmetic for signed types. Out-of-range counts fill
    /// with the sign.
    pub fn shr(self, count: CInt) -> CInt {
        let lhs = self.promote();
        match Self::shift_count(count, lhs.ty.width) {
            Some(n) if lhs.ty.signed => CInt::new(lhs.as_i128() >> n, lhs.ty),
            Some(n) => CInt::from_bits(lhs.bits >> n, lhs.ty),
            None if lhs.is_negative() => CInt::new(-1, lhs.ty),
            None => CInt::from_bits(0, lhs.ty),
        }
    }

    pub fn bitand(self, rhs: CInt) -> CInt {
        let (a, b, ty) = self.balance(rhs);
        CInt::from_bits(a.bits & b.bits, ty)
    }

    pub fn bitor(self, rhs: CInt) -> CInt {
        let (a, b, ty) = self.balance(rhs);
        CInt::from_bits(a.bits | b.bits, ty)
    }

    pub fn bitxor(self, rhs: CInt) -> CInt {
        let (a, b, ty) = self.balance(rhs);
        CInt::from_bits(a.bits ^ b.bits, ty)
    }

    pub fn wrapping_neg(self) -> CInt {
        let v = self.promote();
        CInt::from_bits(v.bits.wrapping_neg(), v.ty)
    }

    pub fn bitnot(self) -> CInt {
        let v = self.promote();
        CInt::from_bits(!v.bits, v.ty)
    }

    pub fn logical_not(self) -> CInt {
        CInt::boolean(self.is_zero())
    }

    /// Three-way comparison after the usual arithmetic conversions, so
    /// `-1 < 0u` is false just as in C.
    pub fn compare(self, rhs: CInt) -> Ordering {
        let (a, b, _) = self.balance(rhs);
        a.as_i128().cmp(&b.as_i128())
    }

    /// Comparison result as a C `int`.
    pub fn compare_with(self, rhs: CInt, accept: impl Fn(Ordering) -> bool) -> CInt {
        CInt::boolean(accept(self.compare(rhs)))
    }
}

impl fmt::Display for CInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i128())
    }
}

impl fmt::LowerHex for CInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.bits, f)
    }
}

/// Types an integer literal the way C does: the first candidate type that
/// holds the value wins, suffixes narrow the candidate list.
pub fn parse_literal(text: &str, model: DataModel) -> Result<CInt, ConstantEvalError> {
    let invalid = || ConstantEvalError::InvalidLiteral(text.to_string());
    let lower = text.to_ascii_lowercase();
    let digits_end = lower.trim_end_matches(['u', 'l']).len();
    let (digits, suffix) = lower.split_at(digits_end);
    // The two letters of `ll` must share a case.
    let raw_suffix = &text[digits_end..];
    if raw_suffix.contains("lL") || raw_suffix.contains("Ll") {
        return Err(invalid());
    }

    let (radix, body) = if let Some(hex) = digits.strip_prefix("0x") {
        (16, hex)
    } else if let Some(bin) = digits.strip_prefix("0b") {
        (2, bin)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };
    if body.is_empty() {
        return Err(invalid());
    }
    let value = u128::from_str_radix(body, radix).map_err(|_| invalid())?;
    let value = u64::try_from(value).map_err(|_| invalid())?;

    let long = IntType::long(model);
    let ulong = IntType::ulong(model);
    let decimal = radix == 10;
    let candidates: Vec<IntType> = match suffix {
        "" if decimal => vec![IntType::INT, long, IntType::LLONG],
        "" => vec![
            IntType::INT,
            IntType::UINT,
            long,
            ulong,
            IntType::LLONG,
            IntType::ULLONG,
        ],
        "u" => vec![IntType::UINT, ulong, IntType::ULLONG],
        "l" if decimal => vec![long, IntType::LLONG],
        "l" => vec![long, ulong, IntType::LLONG, IntType::ULLONG],
        "ul" | "lu" => vec![ulong, IntType::ULLONG],
        "ll" if decimal => vec![IntType::LLONG],
        "ll" => vec![IntType::LLONG, IntType::ULLONG],
        "ull" | "llu" => vec![IntType::ULLONG],
        _ => return Err(invalid()),
    };

    // A decimal too large for every signed candidate becomes unsigned long long.
    let ty = candidates
        .into_iter()
        .find(|ty| value <= ty.max_value())
        .unwrap_or(IntType::ULLONG);
    Ok(CInt::from_bits(value, ty))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(text: &str) -> CInt {
        parse_literal(text, DataModel::Lp64).unwrap()
    }

    #[test]
    fn test_large_unsigned_shift_sets_top_bit() {
        let v = lit("1ull").shl(lit("63"));
        assert_eq!(v.ty(), IntType::ULLONG);
        assert_eq!(v.bits(), 1u64 << 63);
        assert_eq!(v.to_string(), "9223372036854775808");
    }

    #[test]
    fn test_large_signed_shift_wraps_to_zero() {
        let v = lit("20ll").shl(lit("63"));
        assert_eq!(v.ty(), IntType::LLONG);
        assert!(v.is_zero());
    }

    #[test]
    fn test_signed_shift_into_sign_bit() {
        let v = lit("1ll").shl(lit("63"));
        assert_eq!(v.as_i128(), i64::MIN as i128);
    }

    #[test]
    fn test_literal_typing() {
        assert_eq!(lit("100").ty(), IntType::INT);
        assert_eq!(lit("0xffffffff").ty(), IntType::UINT);
        assert_eq!(lit("4294967295").ty(), IntType::LLONG);
        assert_eq!(lit("10u").ty(), IntType::UINT);
        assert_eq!(lit("10UL").ty(), IntType::ULLONG);
        assert_eq!(lit("010").as_i128(), 8);
        assert_eq!(lit("0b101").as_i128(), 5);
        assert_eq!(lit("18446744073709551615").ty(), IntType::ULLONG);
    }

    #[test]
    fn test_ilp32_long_is_32_bits() {
        let v = parse_literal("1l", DataModel::Ilp32).unwrap();
        assert_eq!(v.ty().width, 32);
        assert!(v.shl(lit("40")).is_zero());
    }

    #[test]
    fn test_invalid_literals() {
        assert!(parse_literal("0x", DataModel::Lp64).is_err());
        assert!(parse_literal("12abc", DataModel::Lp64).is_err());
        assert!(parse_literal("99999999999999999999", DataModel::Lp64).is_err());
        assert!(parse_literal("1uu", DataModel::Lp64).is_err());
    }

    #[test]
    fn test_mixed_case_long_long_suffix() {
        assert!(parse_literal("1lL", DataModel::Lp64).is_err());
        assert!(parse_literal("1Ll", DataModel::Lp64).is_err());
        assert!(parse_literal("1ulL", DataModel::Lp64).is_err());
        assert_eq!(lit("1LL").ty(), IntType::LLONG);
        assert_eq!(lit("1ll").ty(), IntType::LLONG);
        assert_eq!(lit("1uLL").ty(), IntType::ULLONG);
        assert_eq!(lit("1Ul").ty(), IntType::ulong(DataModel::Lp64));
    }

    #[test]
    fn test_usual_arithmetic_conversions() {
        // -1 converts to UINT_MAX when compared against an unsigned int.
        let minus_one = CInt::int(-1);
        assert_eq!(minus_one.compare(lit("0u")), Ordering::Greater);
        assert_eq!(minus_one.compare(lit("0")), Ordering::Less);
        // int + unsigned long long is unsigned long long.
        assert_eq!(minus_one.wrapping_add(lit("1ull")).ty(), IntType::ULLONG);
        // unsigned int + long is long on LP64.
        assert_eq!(lit("1u").wrapping_add(lit("1l")).ty(), IntType::LLONG);
    }

    #[test]
    fn test_wrapping_and_division() {
        let max = CInt::int(i32::MAX as i64);
        assert_eq!(max.wrapping_add(CInt::int(1)).as_i128(), i32::MIN as i128);
        assert_eq!(CInt::int(-7).checked_div(CInt::int(2)).unwrap().as_i128(), -3);
        assert_eq!(CInt::int(-7).checked_rem(CInt::int(2)).unwrap().as_i128(), -1);
        let min = CInt::int(i32::MIN as i64);
        assert_eq!(min.checked_div(CInt::int(-1)).unwrap(), min);
        assert_eq!(
            CInt::int(1).checked_div(CInt::int(0)),
            Err(ConstantEvalError::DivisionByZero)
        );
    }

    #[test]
    fn test_shift_out_of_range() {
        assert!(CInt::int(1).shl(CInt::int(32)).is_zero());
        assert!(CInt::int(1).shl(CInt::int(-1)).is_zero());
        assert_eq!(CInt::int(-8).shr(CInt::int(1)).as_i128(), -4);
        assert_eq!(CInt::int(-8).shr(CInt::int(99)).as_i128(), -1);
        assert_eq!(lit("0x80000000").shr(lit("31")).as_i128(), 1);
    }

    #[test]
    fn test_promotion_of_narrow_types() {
        let c = CInt::new(-1, IntType::CHAR);
        assert_eq!(c.bits(), 0xff);
        assert_eq!(c.promote().ty(), IntType::INT);
        assert_eq!(c.bitnot().as_i128(), 0);
        assert_eq!(CInt::new(200, IntType::new(8, false)).promote().as_i128(), 200);
    }

    #[test]
    fn test_hex_formatting() {
        assert_eq!(format!("{:x}", CInt::int(-1)), "ffffffff");
    }
}
