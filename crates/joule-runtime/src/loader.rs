//! Chunk loader: parses the on-disk "5.1 chunk format" binary into a tree of
//! [`Prototype`]s. Field-for-field layout is grounded on the reference
//! loader (`parse.c`'s `luac_parse`/`luac_parse_func`), not reinvented.

use crate::error::Error;
use crate::proto::{Constant, Instr, Prototype};
use joule_core::StringInterner;
use std::rc::Rc;

const SIGNATURE: [u8; 4] = [0x1B, 0x4C, 0x75, 0x61];
const VERSION: u8 = 0x51;

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn need(&self, n: usize) -> Result<(), Error> {
        if self.pos + n > self.bytes.len() {
            return Err(Error::loader(format!(
                "unexpected end of chunk: need {n} bytes at offset {}, have {}",
                self.pos,
                self.bytes.len()
            )));
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        self.need(n)?;
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    fn i32(&mut self) -> Result<i32, Error> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes(b.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, Error> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes(b.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, Error> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64, Error> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes(b.try_into().unwrap()))
    }

    /// size_t length (includes a trailing NUL), then that many bytes; the
    /// NUL is stripped before the caller sees the content.
    fn lua_string(&mut self) -> Result<Vec<u8>, Error> {
        let len = self.u64()? as usize;
        if len == 0 {
            return Ok(Vec::new());
        }
        let bytes = self.take(len)?;
        Ok(bytes[..len - 1].to_vec())
    }
}

fn check_header(r: &mut Reader) -> Result<(), Error> {
    let sig = r.take(4)?;
    if sig != SIGNATURE {
        return Err(Error::loader(format!("bad signature {sig:02x?}")));
    }
    let version = r.u8()?;
    if version != VERSION {
        return Err(Error::loader(format!("unsupported version 0x{version:02x}")));
    }
    let format = r.u8()?;
    if format != 0 {
        return Err(Error::loader(format!("unsupported format {format}")));
    }
    let endianness = r.u8()?;
    if endianness != 1 {
        return Err(Error::loader("only little-endian chunks are supported"));
    }
    let int_size = r.u8()?;
    if int_size != 4 {
        return Err(Error::loader(format!("unsupported int size {int_size}")));
    }
    let size_t_size = r.u8()?;
    if size_t_size != 8 {
        return Err(Error::loader(format!("unsupported size_t size {size_t_size}")));
    }
    let instr_size = r.u8()?;
    if instr_size != 4 {
        return Err(Error::loader(format!("unsupported instruction size {instr_size}")));
    }
    let num_size = r.u8()?;
    if num_size != 8 {
        return Err(Error::loader(format!("unsupported number size {num_size}")));
    }
    let int_flag = r.u8()?;
    if int_flag != 0 {
        return Err(Error::loader("integer-typed numbers are not supported"));
    }
    Ok(())
}

fn parse_function(r: &mut Reader, interner: &mut StringInterner) -> Result<Prototype, Error> {
    let source_bytes = r.lua_string()?;
    let source = String::from_utf8_lossy(&source_bytes).into_owned();

    let start_line = r.i32()?;
    let end_line = r.i32()?;
    let num_upvalues = r.u8()?;
    let num_parameters = r.u8()?;
    let is_vararg = r.u8()? != 0;
    let max_stack = r.u8()?;

    let num_instrs = r.u32()? as usize;
    let mut code = Vec::with_capacity(num_instrs);
    for _ in 0..num_instrs {
        code.push(Instr(r.u32()?));
    }

    let num_consts = r.u32()? as usize;
    let mut constants = Vec::with_capacity(num_consts);
    for _ in 0..num_consts {
        let tag = r.u8()?;
        let c = match tag {
            0 => Constant::Nil,
            1 => Constant::Bool(r.u8()? != 0),
            3 => Constant::Number(r.f64()?),
            4 => Constant::Str(r.lua_string()?),
            other => return Err(Error::loader(format!("unknown constant tag {other}"))),
        };
        constants.push(c);
    }
    for c in &constants {
        if let Constant::Str(bytes) = c {
            interner.intern_static(bytes);
        }
    }

    let num_funcs = r.u32()? as usize;
    let mut protos = Vec::with_capacity(num_funcs);
    for _ in 0..num_funcs {
        protos.push(Rc::new(parse_function(r, interner)?));
    }

    let num_lines = r.u32()? as usize;
    let mut lines = Vec::with_capacity(num_lines);
    for _ in 0..num_lines {
        lines.push(r.i32()?);
    }

    let num_locals = r.u32()? as usize;
    let mut locals = Vec::with_capacity(num_locals);
    for _ in 0..num_locals {
        let name = r.lua_string()?;
        let _start_pc = r.u32()?;
        let _end_pc = r.u32()?;
        locals.push(String::from_utf8_lossy(&name).into_owned());
    }

    let num_upvalue_names = r.u32()? as usize;
    let mut upvalue_names = Vec::with_capacity(num_upvalue_names);
    for _ in 0..num_upvalue_names {
        let name = r.lua_string()?;
        upvalue_names.push(String::from_utf8_lossy(&name).into_owned());
    }

    Ok(Prototype {
        source,
        start_line,
        end_line,
        num_upvalues,
        num_parameters,
        is_vararg,
        max_stack,
        code,
        constants,
        protos,
        lines,
        locals,
        upvalue_names,
    })
}

/// Parse a whole chunk buffer into its root prototype.
pub fn load_chunk(bytes: &[u8], interner: &mut StringInterner) -> Result<Rc<Prototype>, Error> {
    let mut r = Reader::new(bytes);
    check_header(&mut r)?;
    Ok(Rc::new(parse_function(&mut r, interner)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_chunk() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&SIGNATURE);
        buf.push(VERSION);
        buf.push(0); // format
        buf.push(1); // endianness
        buf.push(4); // int size
        buf.push(8); // size_t size
        buf.push(4); // instr size
        buf.push(8); // number size
        buf.push(0); // int flag

        // root function: empty source name
        buf.extend_from_slice(&1u64.to_le_bytes());
        buf.push(0); // nul-only source string

        buf.extend_from_slice(&0i32.to_le_bytes()); // start_line
        buf.extend_from_slice(&0i32.to_le_bytes()); // end_line
        buf.push(0); // num_upvalues
        buf.push(0); // num_parameters
        buf.push(0); // is_vararg
        buf.push(2); // max_stack

        buf.extend_from_slice(&0u32.to_le_bytes()); // num_instrs
        buf.extend_from_slice(&0u32.to_le_bytes()); // num_consts
        buf.extend_from_slice(&0u32.to_le_bytes()); // num_funcs
        buf.extend_from_slice(&0u32.to_le_bytes()); // num_lines
        buf.extend_from_slice(&0u32.to_le_bytes()); // num_locals
        buf.extend_from_slice(&0u32.to_le_bytes()); // num_upvalue_names
        buf
    }

    #[test]
    fn parses_minimal_chunk() {
        let chunk = minimal_chunk();
        let mut interner = StringInterner::new();
        let proto = load_chunk(&chunk, &mut interner).unwrap();
        assert_eq!(proto.max_stack, 2);
        assert!(proto.code.is_empty());
    }

    #[test]
    fn rejects_bad_signature() {
        let mut chunk = minimal_chunk();
        chunk[0] = 0;
        let mut interner = StringInterner::new();
        assert!(load_chunk(&chunk, &mut interner).is_err());
    }

    #[test]
    fn rejects_bad_version() {
        let mut chunk = minimal_chunk();
        chunk[4] = 0x50;
        let mut interner = StringInterner::new();
        assert!(load_chunk(&chunk, &mut interner).is_err());
    }

    #[test]
    fn rejects_truncated_buffer() {
        let chunk = minimal_chunk();
        let truncated = &chunk[..chunk.len() - 5];
        let mut interner = StringInterner::new();
        assert!(load_chunk(truncated, &mut interner).is_err());
    }

    #[test]
    fn rejects_unknown_constant_tag() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&SIGNATURE);
        buf.push(VERSION);
        buf.push(0);
        buf.push(1);
        buf.push(4);
        buf.push(8);
        buf.push(4);
        buf.push(8);
        buf.push(0);
        buf.extend_from_slice(&1u64.to_le_bytes());
        buf.push(0);
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.push(0);
        buf.push(0);
        buf.push(0);
        buf.push(2);
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes()); // one constant
        buf.push(9); // invalid tag
        let mut interner = StringInterner::new();
        assert!(load_chunk(&buf, &mut interner).is_err());
    }

    #[test]
    fn parses_string_constant_with_embedded_nul_stripped() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&SIGNATURE);
        buf.push(VERSION);
        buf.push(0);
        buf.push(1);
        buf.push(4);
        buf.push(8);
        buf.push(4);
        buf.push(8);
        buf.push(0);
        buf.extend_from_slice(&1u64.to_le_bytes());
        buf.push(0);
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.push(0);
        buf.push(0);
        buf.push(0);
        buf.push(2);
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.push(4); // string tag
        let content = b"hi\0";
        buf.extend_from_slice(&(content.len() as u64).to_le_bytes());
        buf.extend_from_slice(content);
        buf.extend_from_slice(&0u32.to_le_bytes()); // num_funcs
        buf.extend_from_slice(&0u32.to_le_bytes()); // num_lines
        buf.extend_from_slice(&0u32.to_le_bytes()); // num_locals
        buf.extend_from_slice(&0u32.to_le_bytes()); // num_upvalue_names
        let mut interner = StringInterner::new();
        let proto = load_chunk(&buf, &mut interner).unwrap();
        match &proto.constants[0] {
            Constant::Str(bytes) => assert_eq!(bytes, b"hi"),
            other => panic!("expected string constant, got {other:?}"),
        }
    }
}
