//! Reversible x86 branch/call/jump separation.
//!
//! Relative call and jump displacements in machine code differ at every call
//! site even when they reach the same target. Rewriting them as absolute
//! addresses and moving them into their own streams gives the compressor
//! long repeated runs to work with.
//!
//! Layout of a filtered buffer:
//!
//! ```text
//! "BCJ3" | u32 LE original_len | u32 LE main_len | u32 LE call_len | u32 LE jump_len
//! main stream | call stream | jump stream
//! ```
//!
//! `E8` (call) displacements go to the call stream; `E9` and `0F 80..8F`
//! (jmp, jcc) displacements go to the jump stream. Absolute targets are
//! stored big-endian.

use crate::bail;
use crate::bundler::Result;

/// Marker at the start of filtered data.
pub const FILTER_MAGIC: &[u8; 4] = b"BCJ3";

const HEADER_LEN: usize = FILTER_MAGIC.len() + 16;

/// Whether `data` carries the filter header.
pub fn is_filtered(data: &[u8]) -> bool {
    data.len() >= HEADER_LEN && data.starts_with(FILTER_MAGIC)
}

fn read_le(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn is_jcc(opcode: u8) -> bool {
    (0x80..=0x8f).contains(&opcode)
}

/// Splits `input` into main, call and jump streams.
pub fn encode(input: &[u8]) -> Result<Vec<u8>> {
    let len = input.len();
    let mut main = Vec::with_capacity(len);
    let mut call = Vec::new();
    let mut jump = Vec::new();

    let mut i = 0;
    while i < len {
        let opcode = input[i];
        match opcode {
            0xe8 | 0xe9 if i + 5 <= len => {
                main.push(opcode);
                let next = i32::try_from(i + 5)?;
                let target = read_le(input, i + 1).wrapping_add(next);
                let stream = if opcode == 0xe8 { &mut call } else { &mut jump };
                stream.extend_from_slice(&target.to_be_bytes());
                i += 5;
            }
            0x0f if i + 6 <= len && is_jcc(input[i + 1]) => {
                main.extend_from_slice(&input[i..i + 2]);
                let next = i32::try_from(i + 6)?;
                let target = read_le(input, i + 2).wrapping_add(next);
                jump.extend_from_slice(&target.to_be_bytes());
                i += 6;
            }
            _ => {
                main.push(opcode);
                i += 1;
            }
        }
    }

    let mut out = Vec::with_capacity(HEADER_LEN + main.len() + call.len() + jump.len());
    out.extend_from_slice(FILTER_MAGIC);
    for part_len in [len, main.len(), call.len(), jump.len()] {
        out.extend_from_slice(&u32::try_from(part_len)?.to_le_bytes());
    }
    out.extend_from_slice(&main);
    out.extend_from_slice(&call);
    out.extend_from_slice(&jump);

    log::debug!(
        "branch filter: {} bytes -> main {}, call {}, jump {}",
        len,
        main.len(),
        call.len(),
        jump.len()
    );
    Ok(out)
}

struct Stream<'a> {
    name: &'static str,
    data: &'a [u8],
    pos: usize,
}

impl<'a> Stream<'a> {
    fn new(name: &'static str, data: &'a [u8]) -> Self {
        Self { name, data, pos: 0 }
    }

    fn next_target(&mut self) -> Result<i32> {
        let Some(bytes) = self.data.get(self.pos..self.pos + 4) else {
            bail!("branch filter {} stream is truncated", self.name);
        };
        self.pos += 4;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn exhausted(&self) -> bool {
        self.pos == self.data.len()
    }
}

/// Restores the original bytes from a filtered buffer.
pub fn decode(filtered: &[u8]) -> Result<Vec<u8>> {
    if !is_filtered(filtered) {
        bail!("data does not carry the branch filter header");
    }
    let field = |index: usize| -> Result<usize> {
        let at = FILTER_MAGIC.len() + index * 4;
        Ok(usize::try_from(u32::from_le_bytes([
            filtered[at],
            filtered[at + 1],
            filtered[at + 2],
            filtered[at + 3],
        ]))?)
    };
    let (original_len, main_len, call_len, jump_len) = (field(0)?, field(1)?, field(2)?, field(3)?);

    let body = &filtered[HEADER_LEN..];
    if body.len() != main_len + call_len + jump_len {
        bail!(
            "branch filter streams hold {} bytes, header declares {}",
            body.len(),
            main_len + call_len + jump_len
        );
    }
    let (main, rest) = body.split_at(main_len);
    let (call, jump) = rest.split_at(call_len);
    let mut calls = Stream::new("call", call);
    let mut jumps = Stream::new("jump", jump);

    let mut out = Vec::with_capacity(original_len);
    let mut m = 0;
    while m < main.len() {
        let opcode = main[m];
        let at = out.len();
        match opcode {
            0xe8 | 0xe9 if at + 5 <= original_len => {
                let stream = if opcode == 0xe8 { &mut calls } else { &mut jumps };
                let relative = stream.next_target()?.wrapping_sub(i32::try_from(at + 5)?);
                out.push(opcode);
                out.extend_from_slice(&relative.to_le_bytes());
                m += 1;
            }
            0x0f if at + 6 <= original_len && main.get(m + 1).copied().is_some_and(is_jcc) => {
                let relative = jumps.next_target()?.wrapping_sub(i32::try_from(at + 6)?);
                out.extend_from_slice(&main[m..m + 2]);
                out.extend_from_slice(&relative.to_le_bytes());
                m += 2;
            }
            _ => {
                out.push(opcode);
                m += 1;
            }
        }
    }

    if out.len() != original_len || !calls.exhausted() || !jumps.exhausted() {
        bail!(
            "branch filter decode produced {} bytes, expected {}",
            out.len(),
            original_len
        );
    }
    Ok(out)
}
