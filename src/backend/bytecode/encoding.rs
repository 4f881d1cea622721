//! Binary artifact format for compiled modules
//!
//! Layout:
//! - magic `SHCL`, format version byte, flags byte (bit 0 = shadow)
//! - symbol table, entry point, then each type with its functions
//! - varints encode every count and length, strings are length-prefixed
//! - type references are a tag byte; `Deferred` is followed by its inner type

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::backend::models::TypeRef;

use super::body::{Constant, FunctionBody, LocalSlot};
use super::module::{Attribute, FunctionDef, Module, Param, SymbolRef, TypeDef, Visibility};

pub const MAGIC: &[u8; 4] = b"SHCL";
pub const FORMAT_VERSION: u8 = 1;

mod flags {
    pub const SHADOW: u8 = 0x01;
}

/// Tag bytes for constant pool entries
mod tags {
    pub const INT: u8 = 0x01;
    pub const FLOAT: u8 = 0x02;
    pub const BOOL: u8 = 0x03;
    pub const STR: u8 = 0x04;
}

const DEFERRED_TAG: u8 = 7;

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("not a module artifact (bad magic)")]
    BadMagic,
    #[error("unsupported artifact version {0}")]
    UnsupportedVersion(u8),
    #[error("unexpected end of artifact at byte {offset}")]
    Truncated { offset: usize },
    #[error("invalid {what} tag 0x{tag:02x} at byte {offset}")]
    InvalidTag { what: &'static str, tag: u8, offset: usize },
    #[error("invalid UTF-8 string at byte {offset}")]
    InvalidUtf8 { offset: usize },
    #[error("{what} out of range at byte {offset}")]
    OutOfRange { what: &'static str, offset: usize },
    #[error("{count} trailing bytes after module")]
    TrailingBytes { count: usize },
    #[error("artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl Module {
    /// Serialise this module into its artifact form
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(MAGIC);
        buf.push(FORMAT_VERSION);
        buf.push(if self.shadow { flags::SHADOW } else { 0 });

        encode_varint(&mut buf, self.symbols.len() as u64);
        for symbol in &self.symbols {
            encode_symbol(&mut buf, symbol);
        }

        match &self.entry {
            Some(entry) => {
                buf.push(1);
                encode_symbol(&mut buf, entry);
            }
            None => buf.push(0),
        }

        encode_varint(&mut buf, self.types.len() as u64);
        for ty in &self.types {
            encode_string(&mut buf, &ty.name);
            encode_varint(&mut buf, ty.functions.len() as u64);
            for func in &ty.functions {
                encode_function(&mut buf, func);
            }
        }
        buf
    }

    /// Parse a module artifact
    pub fn from_bytes(bytes: &[u8]) -> Result<Module, EncodingError> {
        let mut r = Reader::new(bytes);
        if r.take(MAGIC.len())? != MAGIC {
            return Err(EncodingError::BadMagic);
        }
        let version = r.byte()?;
        if version != FORMAT_VERSION {
            return Err(EncodingError::UnsupportedVersion(version));
        }
        let shadow = r.byte()? & flags::SHADOW != 0;

        let symbol_count = r.count()?;
        let mut symbols = Vec::with_capacity(symbol_count);
        for _ in 0..symbol_count {
            symbols.push(r.symbol()?);
        }

        let entry = match r.byte()? {
            0 => None,
            1 => Some(r.symbol()?),
            tag => {
                return Err(EncodingError::InvalidTag { what: "entry", tag, offset: r.pos - 1 })
            }
        };

        let type_count = r.count()?;
        let mut types = Vec::with_capacity(type_count);
        for _ in 0..type_count {
            let mut ty = TypeDef::new(r.string()?);
            let function_count = r.count()?;
            for _ in 0..function_count {
                ty.functions.push(r.function()?);
            }
            types.push(ty);
        }

        if r.remaining() > 0 {
            return Err(EncodingError::TrailingBytes { count: r.remaining() });
        }

        Ok(Module { shadow, symbols, entry, types })
    }

    /// Write the artifact to `path`
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), EncodingError> {
        let bytes = self.to_bytes();
        debug!(target: "shadowcall::loader", path = %path.as_ref().display(), bytes = bytes.len(), "writing module artifact");
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Read an artifact from `path`
    pub fn read_from(path: impl AsRef<Path>) -> Result<Module, EncodingError> {
        let bytes = std::fs::read(path.as_ref())?;
        debug!(target: "shadowcall::loader", path = %path.as_ref().display(), bytes = bytes.len(), "reading module artifact");
        Module::from_bytes(&bytes)
    }
}

fn encode_symbol(buf: &mut Vec<u8>, symbol: &SymbolRef) {
    encode_string(buf, &symbol.type_name);
    encode_string(buf, &symbol.function);
}

fn encode_function(buf: &mut Vec<u8>, func: &FunctionDef) {
    encode_string(buf, &func.name);
    buf.push(match func.visibility {
        Visibility::Public => 0,
        Visibility::Private => 1,
    });
    buf.push(func.is_static as u8);

    encode_varint(buf, func.params.len() as u64);
    for param in &func.params {
        encode_string(buf, &param.name);
        encode_type(buf, &param.ty);
    }
    encode_type(buf, &func.return_type);

    encode_varint(buf, func.attributes.len() as u64);
    for attr in &func.attributes {
        encode_string(buf, &attr.name);
    }

    encode_body(buf, &func.body);
}

fn encode_body(buf: &mut Vec<u8>, body: &FunctionBody) {
    encode_varint(buf, body.code().len() as u64);
    buf.extend_from_slice(body.code());

    encode_varint(buf, body.constants().len() as u64);
    for constant in body.constants() {
        match constant {
            Constant::Int(n) => {
                buf.push(tags::INT);
                buf.extend_from_slice(&n.to_le_bytes());
            }
            Constant::Float(x) => {
                buf.push(tags::FLOAT);
                buf.extend_from_slice(&x.to_bits().to_le_bytes());
            }
            Constant::Bool(b) => {
                buf.push(tags::BOOL);
                buf.push(*b as u8);
            }
            Constant::Str(s) => {
                buf.push(tags::STR);
                encode_string(buf, s);
            }
        }
    }

    encode_varint(buf, body.locals().len() as u64);
    for local in body.locals() {
        encode_type(buf, &local.ty);
    }
    encode_varint(buf, body.max_stack() as u64);
    buf.push(body.init_locals() as u8);
}

fn encode_type(buf: &mut Vec<u8>, ty: &TypeRef) {
    buf.push(ty.tag());
    if let TypeRef::Deferred(inner) = ty {
        encode_type(buf, inner);
    }
}

/// Encode a varint (variable-length integer) into the buffer
///
/// Uses 7 bits per byte, with high bit as continuation flag.
pub fn encode_varint(buf: &mut Vec<u8>, mut n: u64) {
    while n >= 0x80 {
        buf.push((n as u8) | 0x80);
        n >>= 7;
    }
    buf.push(n as u8);
}

/// Encode a string as length-prefixed bytes
fn encode_string(buf: &mut Vec<u8>, s: &str) {
    encode_varint(buf, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Decode a varint from the start of `bytes`
///
/// Returns (value, bytes_consumed) or None if invalid.
pub fn decode_varint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        if shift >= 64 {
            return None;
        }
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
        shift += 7;
    }
    None
}

/// Cursor over an artifact
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], EncodingError> {
        if self.remaining() < n {
            return Err(EncodingError::Truncated { offset: self.bytes.len() });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, EncodingError> {
        Ok(self.take(1)?[0])
    }

    fn flag(&mut self, what: &'static str) -> Result<bool, EncodingError> {
        match self.byte()? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(EncodingError::InvalidTag { what, tag, offset: self.pos - 1 }),
        }
    }

    fn varint(&mut self) -> Result<u64, EncodingError> {
        let (value, used) = decode_varint(&self.bytes[self.pos..])
            .ok_or(EncodingError::Truncated { offset: self.pos })?;
        self.pos += used;
        Ok(value)
    }

    /// A count that must also fit in the remaining input
    fn count(&mut self) -> Result<usize, EncodingError> {
        let offset = self.pos;
        let n = self.varint()?;
        usize::try_from(n)
            .ok()
            .filter(|&n| n <= self.remaining())
            .ok_or(EncodingError::OutOfRange { what: "count", offset })
    }

    fn string(&mut self) -> Result<String, EncodingError> {
        let len = self.count()?;
        let offset = self.pos;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| EncodingError::InvalidUtf8 { offset })
    }

    fn symbol(&mut self) -> Result<SymbolRef, EncodingError> {
        let type_name = self.string()?;
        let function = self.string()?;
        Ok(SymbolRef::new(type_name, function))
    }

    fn type_ref(&mut self) -> Result<TypeRef, EncodingError> {
        let offset = self.pos;
        match self.byte()? {
            DEFERRED_TAG => Ok(self.type_ref()?.deferred()),
            tag => TypeRef::from_simple_tag(tag)
                .ok_or(EncodingError::InvalidTag { what: "type", tag, offset }),
        }
    }

    fn function(&mut self) -> Result<FunctionDef, EncodingError> {
        let name = self.string()?;
        let offset = self.pos;
        let visibility = match self.byte()? {
            0 => Visibility::Public,
            1 => Visibility::Private,
            tag => return Err(EncodingError::InvalidTag { what: "visibility", tag, offset }),
        };
        let is_static = self.flag("static")?;

        let param_count = self.count()?;
        let mut params = Vec::with_capacity(param_count);
        for _ in 0..param_count {
            let name = self.string()?;
            params.push(Param::new(name, self.type_ref()?));
        }
        let return_type = self.type_ref()?;

        let attr_count = self.count()?;
        let mut attributes = Vec::with_capacity(attr_count);
        for _ in 0..attr_count {
            attributes.push(Attribute::new(self.string()?));
        }

        let body = self.body()?;
        Ok(FunctionDef { name, visibility, is_static, params, return_type, attributes, body })
    }

    fn body(&mut self) -> Result<FunctionBody, EncodingError> {
        let code_len = self.count()?;
        let code = self.take(code_len)?.to_vec();

        let const_count = self.count()?;
        let mut constants = Vec::with_capacity(const_count);
        for _ in 0..const_count {
            let offset = self.pos;
            let constant = match self.byte()? {
                tags::INT => Constant::Int(i64::from_le_bytes(self.array8()?)),
                tags::FLOAT => Constant::Float(f64::from_bits(u64::from_le_bytes(self.array8()?))),
                tags::BOOL => Constant::Bool(self.flag("bool")?),
                tags::STR => Constant::Str(Arc::from(self.string()?)),
                tag => return Err(EncodingError::InvalidTag { what: "constant", tag, offset }),
            };
            constants.push(constant);
        }

        let local_count = self.count()?;
        let mut locals = Vec::with_capacity(local_count);
        for _ in 0..local_count {
            locals.push(LocalSlot::new(self.type_ref()?));
        }

        let offset = self.pos;
        let max_stack = u16::try_from(self.varint()?)
            .map_err(|_| EncodingError::OutOfRange { what: "max_stack", offset })?;
        let init_locals = self.flag("init_locals")?;

        Ok(FunctionBody::from_parts(code, constants, locals, max_stack, init_locals))
    }

    fn array8(&mut self) -> Result<[u8; 8], EncodingError> {
        let mut out = [0u8; 8];
        out.copy_from_slice(self.take(8)?);
        Ok(out)
    }
}
