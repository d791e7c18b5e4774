//! Matter TLV encoding and decoding.
//!
//! Control byte layout follows the Matter wire format: tag control in the top three bits
//! (anonymous or one byte context tag) and element type in the low five bits. For sized
//! types the low two bits of the element type select 1/2/4/8 byte width.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Error, ErrorKind, Result};

/// Default writer capacity - one maximum sized datagram.
pub const DEFAULT_CAPACITY: usize = 1280;

const TYPE_INT: u8 = 0x00;
const TYPE_UINT: u8 = 0x04;
const TYPE_BOOL_FALSE: u8 = 0x08;
const TYPE_BOOL_TRUE: u8 = 0x09;
const TYPE_FLOAT_4: u8 = 0x0A;
const TYPE_FLOAT_8: u8 = 0x0B;
const TYPE_UTF8: u8 = 0x0C;
const TYPE_OCTET_STRING: u8 = 0x10;
const TYPE_NULL: u8 = 0x14;
const TYPE_STRUCT: u8 = 0x15;
const TYPE_ARRAY: u8 = 0x16;
const TYPE_LIST: u8 = 0x17;
const TYPE_END_CONTAINER: u8 = 0x18;

const TYPE_MASK: u8 = 0x1f;
const WIDTH_MASK: u8 = 0x03;
const TAG_CONTROL_SHIFT: u8 = 5;
const TAG_CONTROL_ANONYMOUS: u8 = 0;
const TAG_CONTROL_CONTEXT: u8 = 1;

/// Element tag. Only anonymous and one byte context specific tags are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Anonymous,
    Context(u8),
}

impl Tag {
    /// Context tag number, anonymous tags report 0.
    pub fn number(&self) -> u8 {
        match self {
            Tag::Anonymous => 0,
            Tag::Context(t) => *t,
        }
    }
}

impl From<u8> for Tag {
    fn from(value: u8) -> Self {
        Tag::Context(value)
    }
}

fn uint_width(value: u64) -> u8 {
    if value <= u8::MAX as u64 {
        0
    } else if value <= u16::MAX as u64 {
        1
    } else if value <= u32::MAX as u64 {
        2
    } else {
        3
    }
}

fn int_width(value: i64) -> u8 {
    if i8::try_from(value).is_ok() {
        0
    } else if i16::try_from(value).is_ok() {
        1
    } else if i32::try_from(value).is_ok() {
        2
    } else {
        3
    }
}

/// Bounded TLV writer. Elements are appended in order, containers are opened with
/// `start_*` and closed with [TlvWriter::end_container]; nesting is not checked.
///
/// ```
/// # use matd::tlv;
/// # fn main() -> std::io::Result<()> {
/// let mut tlv = tlv::TlvWriter::new();
/// tlv.start_struct(tlv::Tag::Anonymous)?;
/// tlv.write_uint(0, 42)?;
/// tlv.write_string(1, "temp")?;
/// tlv.end_container()?;
/// assert_eq!(tlv.as_slice()[..4], [0x15, 0x24, 0x00, 0x2a]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TlvWriter {
    data: Vec<u8>,
    capacity: usize,
}

impl TlvWriter {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    fn put(&mut self, tag: Tag, element_type: u8, body: &[u8]) -> Result<()> {
        let tag_len = match tag {
            Tag::Anonymous => 0,
            Tag::Context(_) => 1,
        };
        if self.data.len() + 1 + tag_len + body.len() > self.capacity {
            return Err(Error::new(
                ErrorKind::WriteZero,
                format!("tlv buffer full ({} bytes)", self.capacity),
            ));
        }
        match tag {
            Tag::Anonymous => self
                .data
                .push((TAG_CONTROL_ANONYMOUS << TAG_CONTROL_SHIFT) | element_type),
            Tag::Context(t) => {
                self.data
                    .push((TAG_CONTROL_CONTEXT << TAG_CONTROL_SHIFT) | element_type);
                self.data.push(t);
            }
        }
        self.data.extend_from_slice(body);
        Ok(())
    }

    pub fn write_uint(&mut self, tag: impl Into<Tag>, value: u64) -> Result<()> {
        let width = uint_width(value);
        let bytes = value.to_le_bytes();
        self.put(tag.into(), TYPE_UINT | width, &bytes[..1 << width])
    }

    pub fn write_int(&mut self, tag: impl Into<Tag>, value: i64) -> Result<()> {
        let width = int_width(value);
        let bytes = value.to_le_bytes();
        self.put(tag.into(), TYPE_INT | width, &bytes[..1 << width])
    }

    pub fn write_bool(&mut self, tag: impl Into<Tag>, value: bool) -> Result<()> {
        let t = if value { TYPE_BOOL_TRUE } else { TYPE_BOOL_FALSE };
        self.put(tag.into(), t, &[])
    }

    pub fn write_null(&mut self, tag: impl Into<Tag>) -> Result<()> {
        self.put(tag.into(), TYPE_NULL, &[])
    }

    fn write_sized(&mut self, tag: Tag, base_type: u8, data: &[u8]) -> Result<()> {
        let width = uint_width(data.len() as u64);
        let len_bytes = (data.len() as u64).to_le_bytes();
        let mut body = Vec::with_capacity(data.len() + 8);
        body.extend_from_slice(&len_bytes[..1 << width]);
        body.extend_from_slice(data);
        self.put(tag, base_type | width, &body)
    }

    pub fn write_string(&mut self, tag: impl Into<Tag>, value: &str) -> Result<()> {
        self.write_sized(tag.into(), TYPE_UTF8, value.as_bytes())
    }

    pub fn write_bytes(&mut self, tag: impl Into<Tag>, value: &[u8]) -> Result<()> {
        self.write_sized(tag.into(), TYPE_OCTET_STRING, value)
    }

    pub fn start_struct(&mut self, tag: impl Into<Tag>) -> Result<()> {
        self.put(tag.into(), TYPE_STRUCT, &[])
    }

    pub fn start_array(&mut self, tag: impl Into<Tag>) -> Result<()> {
        self.put(tag.into(), TYPE_ARRAY, &[])
    }

    pub fn start_list(&mut self, tag: impl Into<Tag>) -> Result<()> {
        self.put(tag.into(), TYPE_LIST, &[])
    }

    pub fn end_container(&mut self) -> Result<()> {
        self.put(Tag::Anonymous, TYPE_END_CONTAINER, &[])
    }
}

impl Default for TlvWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    SignedInt,
    UnsignedInt,
    Bool,
    Float,
    Utf8String,
    ByteString,
    Null,
    Structure,
    Array,
    List,
    EndOfContainer,
}

/// Value of a single decoded element. Strings borrow from the reader buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum TlvValue<'a> {
    Int(i64),
    UInt(u64),
    Bool(bool),
    Float(f64),
    Utf8(&'a str),
    Bytes(&'a [u8]),
    Null,
    Structure,
    Array,
    List,
    EndOfContainer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TlvElement<'a> {
    pub tag: Tag,
    pub value: TlvValue<'a>,
}

/// Typed accessors return zero/false/empty on type mismatch; treat that as "absent".
impl<'a> TlvElement<'a> {
    pub fn element_type(&self) -> ElementType {
        match self.value {
            TlvValue::Int(_) => ElementType::SignedInt,
            TlvValue::UInt(_) => ElementType::UnsignedInt,
            TlvValue::Bool(_) => ElementType::Bool,
            TlvValue::Float(_) => ElementType::Float,
            TlvValue::Utf8(_) => ElementType::Utf8String,
            TlvValue::Bytes(_) => ElementType::ByteString,
            TlvValue::Null => ElementType::Null,
            TlvValue::Structure => ElementType::Structure,
            TlvValue::Array => ElementType::Array,
            TlvValue::List => ElementType::List,
            TlvValue::EndOfContainer => ElementType::EndOfContainer,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(
            self.value,
            TlvValue::Structure | TlvValue::Array | TlvValue::List
        )
    }

    pub fn is_end_of_container(&self) -> bool {
        self.value == TlvValue::EndOfContainer
    }

    pub fn as_u64(&self) -> u64 {
        match self.value {
            TlvValue::UInt(v) => v,
            _ => 0,
        }
    }
    pub fn as_u32(&self) -> u32 {
        self.as_u64() as u32
    }
    pub fn as_u16(&self) -> u16 {
        self.as_u64() as u16
    }
    pub fn as_u8(&self) -> u8 {
        self.as_u64() as u8
    }
    pub fn as_i64(&self) -> i64 {
        match self.value {
            TlvValue::Int(v) => v,
            _ => 0,
        }
    }
    pub fn as_i32(&self) -> i32 {
        self.as_i64() as i32
    }
    pub fn as_i16(&self) -> i16 {
        self.as_i64() as i16
    }
    pub fn as_bool(&self) -> bool {
        matches!(self.value, TlvValue::Bool(true))
    }
    pub fn as_bytes(&self) -> &'a [u8] {
        match self.value {
            TlvValue::Bytes(b) => b,
            _ => &[],
        }
    }
    pub fn as_str(&self) -> &'a str {
        match self.value {
            TlvValue::Utf8(s) => s,
            _ => "",
        }
    }
}

/// Streaming TLV reader over a borrowed buffer.
pub struct TlvReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> TlvReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn is_end(&self) -> bool {
        self.position() >= self.cursor.get_ref().len()
    }

    fn read_length(&mut self, width: u8) -> Result<usize> {
        let len = match width {
            0 => self.cursor.read_u8()? as u64,
            1 => self.cursor.read_u16::<LittleEndian>()? as u64,
            2 => self.cursor.read_u32::<LittleEndian>()? as u64,
            _ => self.cursor.read_u64::<LittleEndian>()?,
        };
        Ok(len as usize)
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        let data: &'a [u8] = *self.cursor.get_ref();
        let start = self.position();
        let end = start
            .checked_add(len)
            .filter(|e| *e <= data.len())
            .ok_or_else(|| Error::new(ErrorKind::UnexpectedEof, "tlv value truncated"))?;
        self.cursor.set_position(end as u64);
        Ok(&data[start..end])
    }

    /// Decode one element and advance past it. Containers yield only their start marker.
    pub fn next(&mut self) -> Result<TlvElement<'a>> {
        let control = self.cursor.read_u8()?;
        let tag = match control >> TAG_CONTROL_SHIFT {
            TAG_CONTROL_ANONYMOUS => Tag::Anonymous,
            TAG_CONTROL_CONTEXT => Tag::Context(self.cursor.read_u8()?),
            other => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("unsupported tlv tag control {}", other),
                ))
            }
        };
        let element_type = control & TYPE_MASK;
        let width = element_type & WIDTH_MASK;
        let value = match element_type {
            0x00..=0x03 => TlvValue::Int(match width {
                0 => self.cursor.read_i8()? as i64,
                1 => self.cursor.read_i16::<LittleEndian>()? as i64,
                2 => self.cursor.read_i32::<LittleEndian>()? as i64,
                _ => self.cursor.read_i64::<LittleEndian>()?,
            }),
            0x04..=0x07 => TlvValue::UInt(match width {
                0 => self.cursor.read_u8()? as u64,
                1 => self.cursor.read_u16::<LittleEndian>()? as u64,
                2 => self.cursor.read_u32::<LittleEndian>()? as u64,
                _ => self.cursor.read_u64::<LittleEndian>()?,
            }),
            TYPE_BOOL_FALSE => TlvValue::Bool(false),
            TYPE_BOOL_TRUE => TlvValue::Bool(true),
            TYPE_FLOAT_4 => TlvValue::Float(self.cursor.read_f32::<LittleEndian>()? as f64),
            TYPE_FLOAT_8 => TlvValue::Float(self.cursor.read_f64::<LittleEndian>()?),
            0x0C..=0x0F => {
                let len = self.read_length(width)?;
                let raw = self.read_slice(len)?;
                let s = std::str::from_utf8(raw)
                    .map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
                TlvValue::Utf8(s)
            }
            0x10..=0x13 => {
                let len = self.read_length(width)?;
                TlvValue::Bytes(self.read_slice(len)?)
            }
            TYPE_NULL => TlvValue::Null,
            TYPE_STRUCT => TlvValue::Structure,
            TYPE_ARRAY => TlvValue::Array,
            TYPE_LIST => TlvValue::List,
            TYPE_END_CONTAINER => TlvValue::EndOfContainer,
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("unknown tlv type 0x{:x}", element_type),
                ))
            }
        };
        Ok(TlvElement { tag, value })
    }

    /// Decode the next element without advancing.
    pub fn peek(&mut self) -> Result<TlvElement<'a>> {
        let pos = self.cursor.position();
        let res = self.next();
        self.cursor.set_position(pos);
        res
    }

    /// Advance past one element without looking at it.
    pub fn skip(&mut self) -> Result<()> {
        self.next().map(|_| ())
    }

    /// Skip the remaining content of a container whose start was already consumed,
    /// including its end marker.
    pub fn skip_container(&mut self) -> Result<()> {
        let mut depth = 1;
        while depth > 0 {
            let e = self.next()?;
            if e.is_container() {
                depth += 1;
            } else if e.is_end_of_container() {
                depth -= 1;
            }
        }
        Ok(())
    }
}

/// Enum containing data of decoded tlv element
#[derive(Debug, Clone, PartialEq)]
pub enum TlvItemValue {
    Int(u64),
    SignedInt(i64),
    Bool(bool),
    Float(f64),
    String(String),
    OctetString(Vec<u8>),
    List(Vec<TlvItem>),
    Nil(),
}

/// Decoded tlv element returned by [decode_tlv]
#[derive(Debug, Clone, PartialEq)]
pub struct TlvItem {
    pub tag: u8,
    pub value: TlvItemValue,
}

impl TlvItem {
    pub fn get(&self, tag: &[u8]) -> Option<&TlvItemValue> {
        self.get_item(tag).map(|i| &i.value)
    }
    pub fn get_item(&self, tag: &[u8]) -> Option<&TlvItem> {
        if tag.is_empty() {
            return Some(self);
        }
        if let TlvItemValue::List(lst) = &self.value {
            for l in lst {
                if l.tag == tag[0] {
                    return l.get_item(&tag[1..]);
                }
            }
        }
        None
    }
    pub fn get_int(&self, tag: &[u8]) -> Option<u64> {
        match self.get(tag) {
            Some(TlvItemValue::Int(i)) => Some(*i),
            _ => None,
        }
    }
    pub fn get_signed(&self, tag: &[u8]) -> Option<i64> {
        match self.get(tag) {
            Some(TlvItemValue::SignedInt(i)) => Some(*i),
            _ => None,
        }
    }
    pub fn get_bool(&self, tag: &[u8]) -> Option<bool> {
        match self.get(tag) {
            Some(TlvItemValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }
    pub fn get_u8(&self, tag: &[u8]) -> Option<u8> {
        self.get_int(tag).map(|i| i as u8)
    }
    pub fn get_u16(&self, tag: &[u8]) -> Option<u16> {
        self.get_int(tag).map(|i| i as u16)
    }
    pub fn get_u32(&self, tag: &[u8]) -> Option<u32> {
        self.get_int(tag).map(|i| i as u32)
    }
    pub fn get_octet_string(&self, tag: &[u8]) -> Option<&[u8]> {
        match self.get(tag) {
            Some(TlvItemValue::OctetString(o)) => Some(o),
            _ => None,
        }
    }
    pub fn get_string_owned(&self, tag: &[u8]) -> Option<String> {
        match self.get(tag) {
            Some(TlvItemValue::String(s)) => Some(s.clone()),
            _ => None,
        }
    }
    /// Children of a container item, empty for scalars.
    pub fn children(&self) -> &[TlvItem] {
        match &self.value {
            TlvItemValue::List(l) => l,
            _ => &[],
        }
    }
}

fn decode(reader: &mut TlvReader, container: &mut Vec<TlvItem>, nested: bool) -> Result<()> {
    while !reader.is_end() {
        let element = reader.next()?;
        let tag = element.tag.number();
        let value = match element.value {
            TlvValue::EndOfContainer => {
                if nested {
                    return Ok(());
                }
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    "end of container outside of container",
                ));
            }
            TlvValue::Structure | TlvValue::Array | TlvValue::List => {
                let mut c2 = Vec::new();
                decode(reader, &mut c2, true)?;
                TlvItemValue::List(c2)
            }
            TlvValue::Int(i) => TlvItemValue::SignedInt(i),
            TlvValue::UInt(u) => TlvItemValue::Int(u),
            TlvValue::Bool(b) => TlvItemValue::Bool(b),
            TlvValue::Float(f) => TlvItemValue::Float(f),
            TlvValue::Utf8(s) => TlvItemValue::String(s.to_owned()),
            TlvValue::Bytes(b) => TlvItemValue::OctetString(b.to_vec()),
            TlvValue::Null => TlvItemValue::Nil(),
        };
        container.push(TlvItem { tag, value });
    }
    if nested {
        Err(Error::new(
            ErrorKind::UnexpectedEof,
            "tlv container not terminated",
        ))
    } else {
        Ok(())
    }
}

/// decode raw buffer with tlv data
pub fn decode_tlv(data: &[u8]) -> Result<TlvItem> {
    let mut container = Vec::new();
    let mut reader = TlvReader::new(data);
    decode(&mut reader, &mut container, false)?;
    if container.len() == 1 {
        container
            .pop()
            .ok_or_else(|| Error::new(ErrorKind::InvalidData, "no data found"))
    } else {
        Ok(TlvItem {
            tag: 0,
            value: TlvItemValue::List(container),
        })
    }
}
