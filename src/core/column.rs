// Column element types, typed value vectors, and little-endian encoding.
use std::fmt;

use roaring::RoaringBitmap;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ColumnType {
    Byte,
    UByte,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
}

impl ColumnType {
    pub const ALL: [ColumnType; 10] = [
        ColumnType::Byte,
        ColumnType::UByte,
        ColumnType::Short,
        ColumnType::UShort,
        ColumnType::Int,
        ColumnType::UInt,
        ColumnType::Long,
        ColumnType::ULong,
        ColumnType::Float,
        ColumnType::Double,
    ];

    /// Name written to `data_type` in partition metadata.
    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Byte => "BYTE",
            ColumnType::UByte => "UBYTE",
            ColumnType::Short => "SHORT",
            ColumnType::UShort => "USHORT",
            ColumnType::Int => "INT",
            ColumnType::UInt => "UINT",
            ColumnType::Long => "LONG",
            ColumnType::ULong => "ULONG",
            ColumnType::Float => "FLOAT",
            ColumnType::Double => "DOUBLE",
        }
    }

    pub fn width(self) -> usize {
        match self {
            ColumnType::Byte | ColumnType::UByte => 1,
            ColumnType::Short | ColumnType::UShort => 2,
            ColumnType::Int | ColumnType::UInt | ColumnType::Float => 4,
            ColumnType::Long | ColumnType::ULong | ColumnType::Double => 8,
        }
    }

    /// Parses a type name or alias (`int`, `short`, `f`, `unsigned char`, ...).
    pub fn parse(input: &str) -> Result<Self, Error> {
        let name = input.trim().to_ascii_lowercase();
        let ty = match name.as_str() {
            "byte" | "char" | "b" => ColumnType::Byte,
            "ubyte" | "unsigned char" | "a" => ColumnType::UByte,
            "short" | "h" => ColumnType::Short,
            "ushort" | "unsigned short" | "g" => ColumnType::UShort,
            "int" | "i" => ColumnType::Int,
            "uint" | "unsigned" | "unsigned int" | "u" => ColumnType::UInt,
            "long" | "l" => ColumnType::Long,
            "ulong" | "unsigned long" | "v" => ColumnType::ULong,
            "float" | "real" | "f" | "r" => ColumnType::Float,
            "double" | "d" => ColumnType::Double,
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("unknown column type \"{input}\""))
                    .with_hint("Use one of byte, ubyte, short, ushort, int, uint, long, ulong, float, double."));
            }
        };
        Ok(ty)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-width numeric element stored in a column file.
pub trait Element: Copy + PartialEq + fmt::Display + Send + Sync + 'static {
    const NULL: Self;
    const WIDTH: usize;
    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, out: &mut Vec<u8>);
    fn as_f64(self) -> f64;
}

macro_rules! impl_element {
    ($($ty:ty => $null:expr),* $(,)?) => {
        $(
            impl Element for $ty {
                const NULL: Self = $null;
                const WIDTH: usize = std::mem::size_of::<$ty>();

                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::WIDTH]);
                    <$ty>::from_le_bytes(raw)
                }

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn as_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_element! {
    i8 => i8::MAX,
    u8 => u8::MAX,
    i16 => i16::MAX,
    u16 => u16::MAX,
    i32 => i32::MAX,
    u32 => u32::MAX,
    i64 => i64::MAX,
    u64 => u64::MAX,
    f32 => f32::NAN,
    f64 => f64::NAN,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ColumnValues {
    Byte(Vec<i8>),
    UByte(Vec<u8>),
    Short(Vec<i16>),
    UShort(Vec<u16>),
    Int(Vec<i32>),
    UInt(Vec<u32>),
    Long(Vec<i64>),
    ULong(Vec<u64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

macro_rules! with_values {
    ($values:expr, $v:ident => $body:expr) => {
        match $values {
            ColumnValues::Byte($v) => $body,
            ColumnValues::UByte($v) => $body,
            ColumnValues::Short($v) => $body,
            ColumnValues::UShort($v) => $body,
            ColumnValues::Int($v) => $body,
            ColumnValues::UInt($v) => $body,
            ColumnValues::Long($v) => $body,
            ColumnValues::ULong($v) => $body,
            ColumnValues::Float($v) => $body,
            ColumnValues::Double($v) => $body,
        }
    };
}

fn decode_vec<T: Element>(bytes: &[u8]) -> Vec<T> {
    bytes.chunks_exact(T::WIDTH).map(T::read_le).collect()
}

fn null_vec<T: Element>(len: usize) -> Vec<T> {
    vec![T::NULL; len]
}

fn pad<T: Element>(values: &mut Vec<T>, len: usize) {
    if values.len() < len {
        values.resize(len, T::NULL);
    }
}

fn overlay<T: Element>(dst: &mut Vec<T>, start: usize, src: &[T]) {
    let end = start + src.len();
    if dst.len() < end {
        dst.resize(end, T::NULL);
    }
    dst[start..end].copy_from_slice(src);
}

impl ColumnValues {
    pub fn nulls(ty: ColumnType, len: usize) -> Self {
        match ty {
            ColumnType::Byte => ColumnValues::Byte(null_vec(len)),
            ColumnType::UByte => ColumnValues::UByte(null_vec(len)),
            ColumnType::Short => ColumnValues::Short(null_vec(len)),
            ColumnType::UShort => ColumnValues::UShort(null_vec(len)),
            ColumnType::Int => ColumnValues::Int(null_vec(len)),
            ColumnType::UInt => ColumnValues::UInt(null_vec(len)),
            ColumnType::Long => ColumnValues::Long(null_vec(len)),
            ColumnType::ULong => ColumnValues::ULong(null_vec(len)),
            ColumnType::Float => ColumnValues::Float(null_vec(len)),
            ColumnType::Double => ColumnValues::Double(null_vec(len)),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnValues::Byte(_) => ColumnType::Byte,
            ColumnValues::UByte(_) => ColumnType::UByte,
            ColumnValues::Short(_) => ColumnType::Short,
            ColumnValues::UShort(_) => ColumnType::UShort,
            ColumnValues::Int(_) => ColumnType::Int,
            ColumnValues::UInt(_) => ColumnType::UInt,
            ColumnValues::Long(_) => ColumnType::Long,
            ColumnValues::ULong(_) => ColumnType::ULong,
            ColumnValues::Float(_) => ColumnType::Float,
            ColumnValues::Double(_) => ColumnType::Double,
        }
    }

    pub fn len(&self) -> usize {
        with_values!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn value_as_f64(&self, row: usize) -> Option<f64> {
        with_values!(self, v => v.get(row).map(|x| x.as_f64()))
    }

    /// Value at `row` rendered in its stored type.
    pub fn display_value(&self, row: usize) -> Option<String> {
        with_values!(self, v => v.get(row).map(|x| x.to_string()))
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        with_values!(self, v => v.iter().map(|x| x.as_f64()).collect())
    }

    pub fn encode_le(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() * self.column_type().width());
        with_values!(self, v => v.iter().for_each(|x| x.write_le(&mut out)));
        out
    }

    pub fn decode_le(ty: ColumnType, bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() % ty.width() != 0 {
            return Err(Error::new(ErrorKind::Corrupt).with_message(format!(
                "{} bytes is not a whole number of {} values",
                bytes.len(),
                ty
            )));
        }
        let values = match ty {
            ColumnType::Byte => ColumnValues::Byte(decode_vec(bytes)),
            ColumnType::UByte => ColumnValues::UByte(decode_vec(bytes)),
            ColumnType::Short => ColumnValues::Short(decode_vec(bytes)),
            ColumnType::UShort => ColumnValues::UShort(decode_vec(bytes)),
            ColumnType::Int => ColumnValues::Int(decode_vec(bytes)),
            ColumnType::UInt => ColumnValues::UInt(decode_vec(bytes)),
            ColumnType::Long => ColumnValues::Long(decode_vec(bytes)),
            ColumnType::ULong => ColumnValues::ULong(decode_vec(bytes)),
            ColumnType::Float => ColumnValues::Float(decode_vec(bytes)),
            ColumnType::Double => ColumnValues::Double(decode_vec(bytes)),
        };
        Ok(values)
    }

    /// Pads with the type's null value up to `len` rows.
    pub fn pad_to(&mut self, len: usize) {
        with_values!(self, v => pad(v, len))
    }

    /// Writes `src` over rows `start..start + src.len()`, growing as needed.
    pub fn overlay(&mut self, start: usize, src: &ColumnValues) -> Result<(), Error> {
        match (self, src) {
            (ColumnValues::Byte(d), ColumnValues::Byte(s)) => overlay(d, start, s),
            (ColumnValues::UByte(d), ColumnValues::UByte(s)) => overlay(d, start, s),
            (ColumnValues::Short(d), ColumnValues::Short(s)) => overlay(d, start, s),
            (ColumnValues::UShort(d), ColumnValues::UShort(s)) => overlay(d, start, s),
            (ColumnValues::Int(d), ColumnValues::Int(s)) => overlay(d, start, s),
            (ColumnValues::UInt(d), ColumnValues::UInt(s)) => overlay(d, start, s),
            (ColumnValues::Long(d), ColumnValues::Long(s)) => overlay(d, start, s),
            (ColumnValues::ULong(d), ColumnValues::ULong(s)) => overlay(d, start, s),
            (ColumnValues::Float(d), ColumnValues::Float(s)) => overlay(d, start, s),
            (ColumnValues::Double(d), ColumnValues::Double(s)) => overlay(d, start, s),
            (dst, src) => {
                return Err(Error::new(ErrorKind::Type).with_message(format!(
                    "cannot store {} values in a {} column",
                    src.column_type(),
                    dst.column_type()
                )));
            }
        }
        Ok(())
    }
}

macro_rules! impl_from_vec {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for ColumnValues {
                fn from(values: Vec<$ty>) -> Self {
                    ColumnValues::$variant(values)
                }
            }
        )*
    };
}

impl_from_vec! {
    i8 => Byte,
    u8 => UByte,
    i16 => Short,
    u16 => UShort,
    i32 => Int,
    u32 => UInt,
    i64 => Long,
    u64 => ULong,
    f32 => Float,
    f64 => Double,
}

/// Target type for qualified-value retrieval.
pub trait Qualified: Copy + fmt::Display + Send + Sync + 'static {
    /// Single-letter tag used on the command line.
    const TAG: char;

    fn select(values: &ColumnValues, rows: &RoaringBitmap) -> Result<Vec<Self>, Error>;
}

fn pick<S: Copy, T>(src: &[S], rows: &RoaringBitmap, convert: impl Fn(S) -> T) -> Result<Vec<T>, Error> {
    rows.iter()
        .map(|row| {
            src.get(row as usize).copied().map(&convert).ok_or_else(|| {
                Error::new(ErrorKind::Internal)
                    .with_message(format!("row {row} is beyond the end of the column"))
            })
        })
        .collect()
}

fn incompatible(values: &ColumnValues, wanted: &str) -> Error {
    Error::new(ErrorKind::Type).with_message(format!(
        "incompatible data type: cannot retrieve {} values as {wanted}",
        values.column_type()
    ))
}

impl Qualified for i32 {
    const TAG: char = 'i';

    fn select(values: &ColumnValues, rows: &RoaringBitmap) -> Result<Vec<Self>, Error> {
        match values {
            ColumnValues::Byte(v) => pick(v, rows, i32::from),
            ColumnValues::UByte(v) => pick(v, rows, i32::from),
            ColumnValues::Short(v) => pick(v, rows, i32::from),
            ColumnValues::UShort(v) => pick(v, rows, i32::from),
            ColumnValues::Int(v) => pick(v, rows, |x| x),
            other => Err(incompatible(other, "32-bit integers")),
        }
    }
}

impl Qualified for i8 {
    const TAG: char = 'b';

    fn select(values: &ColumnValues, rows: &RoaringBitmap) -> Result<Vec<Self>, Error> {
        match values {
            ColumnValues::Byte(v) => pick(v, rows, |x| x),
            other => Err(incompatible(other, "8-bit integers")),
        }
    }
}

impl Qualified for u8 {
    const TAG: char = 'a';

    fn select(values: &ColumnValues, rows: &RoaringBitmap) -> Result<Vec<Self>, Error> {
        match values {
            ColumnValues::UByte(v) => pick(v, rows, |x| x),
            other => Err(incompatible(other, "unsigned 8-bit integers")),
        }
    }
}

impl Qualified for i16 {
    const TAG: char = 'h';

    fn select(values: &ColumnValues, rows: &RoaringBitmap) -> Result<Vec<Self>, Error> {
        match values {
            ColumnValues::Byte(v) => pick(v, rows, i16::from),
            ColumnValues::UByte(v) => pick(v, rows, i16::from),
            ColumnValues::Short(v) => pick(v, rows, |x| x),
            other => Err(incompatible(other, "16-bit integers")),
        }
    }
}

impl Qualified for u16 {
    const TAG: char = 'g';

    fn select(values: &ColumnValues, rows: &RoaringBitmap) -> Result<Vec<Self>, Error> {
        match values {
            ColumnValues::UByte(v) => pick(v, rows, u16::from),
            ColumnValues::UShort(v) => pick(v, rows, |x| x),
            other => Err(incompatible(other, "unsigned 16-bit integers")),
        }
    }
}

impl Qualified for u32 {
    const TAG: char = 'u';

    fn select(values: &ColumnValues, rows: &RoaringBitmap) -> Result<Vec<Self>, Error> {
        match values {
            ColumnValues::UByte(v) => pick(v, rows, u32::from),
            ColumnValues::UShort(v) => pick(v, rows, u32::from),
            ColumnValues::UInt(v) => pick(v, rows, |x| x),
            other => Err(incompatible(other, "unsigned 32-bit integers")),
        }
    }
}

impl Qualified for u64 {
    const TAG: char = 'v';

    fn select(values: &ColumnValues, rows: &RoaringBitmap) -> Result<Vec<Self>, Error> {
        match values {
            ColumnValues::UByte(v) => pick(v, rows, u64::from),
            ColumnValues::UShort(v) => pick(v, rows, u64::from),
            ColumnValues::UInt(v) => pick(v, rows, u64::from),
            ColumnValues::ULong(v) => pick(v, rows, |x| x),
            other => Err(incompatible(other, "unsigned 64-bit integers")),
        }
    }
}

impl Qualified for i64 {
    const TAG: char = 'l';

    fn select(values: &ColumnValues, rows: &RoaringBitmap) -> Result<Vec<Self>, Error> {
        match values {
            ColumnValues::Byte(v) => pick(v, rows, i64::from),
            ColumnValues::UByte(v) => pick(v, rows, i64::from),
            ColumnValues::Short(v) => pick(v, rows, i64::from),
            ColumnValues::UShort(v) => pick(v, rows, i64::from),
            ColumnValues::Int(v) => pick(v, rows, i64::from),
            ColumnValues::UInt(v) => pick(v, rows, i64::from),
            ColumnValues::Long(v) => pick(v, rows, |x| x),
            other => Err(incompatible(other, "64-bit integers")),
        }
    }
}

impl Qualified for f32 {
    const TAG: char = 'f';

    fn select(values: &ColumnValues, rows: &RoaringBitmap) -> Result<Vec<Self>, Error> {
        match values {
            ColumnValues::Byte(v) => pick(v, rows, f32::from),
            ColumnValues::UByte(v) => pick(v, rows, f32::from),
            ColumnValues::Short(v) => pick(v, rows, f32::from),
            ColumnValues::UShort(v) => pick(v, rows, f32::from),
            ColumnValues::Float(v) => pick(v, rows, |x| x),
            other => Err(incompatible(other, "32-bit floats")),
        }
    }
}

impl Qualified for f64 {
    const TAG: char = 'd';

    fn select(values: &ColumnValues, rows: &RoaringBitmap) -> Result<Vec<Self>, Error> {
        with_values!(values, v => pick(v, rows, |x| x.as_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnType, ColumnValues, Qualified};
    use crate::core::error::ErrorKind;
    use roaring::RoaringBitmap;

    #[test]
    fn type_aliases_resolve() {
        assert_eq!(ColumnType::parse("int").unwrap(), ColumnType::Int);
        assert_eq!(ColumnType::parse("SHORT").unwrap(), ColumnType::Short);
        assert_eq!(ColumnType::parse("r").unwrap(), ColumnType::Float);
        assert_eq!(ColumnType::parse("unsigned char").unwrap(), ColumnType::UByte);
        let err = ColumnType::parse("decimal").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn encode_decode_preserves_values() {
        let values = ColumnValues::from(vec![-3i16, 0, 7, i16::MAX]);
        let bytes = values.encode_le();
        assert_eq!(bytes.len(), 8);
        let decoded = ColumnValues::decode_le(ColumnType::Short, &bytes).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn decode_rejects_partial_values() {
        let err = ColumnValues::decode_le(ColumnType::Int, &[0, 1, 2]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn overlay_pads_gap_with_nulls() {
        let mut values = ColumnValues::from(vec![1i32, 2]);
        values.overlay(4, &ColumnValues::from(vec![9i32])).unwrap();
        assert_eq!(
            values,
            ColumnValues::from(vec![1i32, 2, i32::MAX, i32::MAX, 9])
        );

        let err = values
            .overlay(0, &ColumnValues::from(vec![1.0f32]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }

    #[test]
    fn qualified_conversions_follow_widening_rules() {
        let mut rows = RoaringBitmap::new();
        rows.insert(1);
        rows.insert(2);

        let shorts = ColumnValues::from(vec![10i16, 20, 30]);
        assert_eq!(i32::select(&shorts, &rows).unwrap(), vec![20, 30]);
        assert_eq!(f32::select(&shorts, &rows).unwrap(), vec![20.0, 30.0]);

        let floats = ColumnValues::from(vec![1.5f32, 2.5, 3.5]);
        assert_eq!(f64::select(&floats, &rows).unwrap(), vec![2.5, 3.5]);
        let err = i32::select(&floats, &rows).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);

        let longs = ColumnValues::from(vec![1i64, 2, 3]);
        assert!(i32::select(&longs, &rows).is_err());
        assert_eq!(i64::select(&longs, &rows).unwrap(), vec![2, 3]);
    }

    #[test]
    fn narrow_and_unsigned_retrieval_is_lossless_only() {
        let mut rows = RoaringBitmap::new();
        rows.insert(0);
        rows.insert(2);

        let ubytes = ColumnValues::from(vec![200u8, 1, 7]);
        assert_eq!(u8::select(&ubytes, &rows).unwrap(), vec![200, 7]);
        assert_eq!(i16::select(&ubytes, &rows).unwrap(), vec![200, 7]);
        assert_eq!(u32::select(&ubytes, &rows).unwrap(), vec![200, 7]);
        assert_eq!(i8::select(&ubytes, &rows).unwrap_err().kind(), ErrorKind::Type);

        let bytes = ColumnValues::from(vec![-1i8, 0, 5]);
        assert_eq!(i8::select(&bytes, &rows).unwrap(), vec![-1, 5]);
        assert_eq!(u16::select(&bytes, &rows).unwrap_err().kind(), ErrorKind::Type);

        let ulongs = ColumnValues::from(vec![u64::MAX - 1, 0, 9]);
        assert_eq!(u64::select(&ulongs, &rows).unwrap(), vec![u64::MAX - 1, 9]);
        assert!(u32::select(&ulongs, &rows).is_err());
        assert!(i64::select(&ulongs, &rows).is_err());
    }
}
