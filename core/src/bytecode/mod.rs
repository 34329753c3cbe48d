//! Compact binary serialization of TIL trees and CFGs.
//!
//! The stream is a raw sequence of atoms (no header, no version marker),
//! little-endian throughout. The writer emits children before parents;
//! the reader rebuilds nodes through the [`til::Builder`](crate::til::Builder)
//! using a reconstruction stack. Structural pseudo-opcodes bracket scopes,
//! blocks and whole CFGs so graph back-edges survive the linear encoding.

mod opcode;
mod reader;
mod stream;
mod writer;

pub use opcode::{Opcode, PseudoOp, Tag};
pub use reader::BytecodeReader;
pub use stream::{
    dump_bytes, ByteSink, ByteSource, CodecOptions, ReadSource, StreamReader, StreamWriter,
    WriteSink, MAX_ATOM_SIZE,
};
pub use writer::BytecodeWriter;
