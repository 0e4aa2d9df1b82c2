//! Streaming push-generator for Marshal 4.8 byte streams.

use std::io::Write;

use num_bigint::{BigInt, Sign};

use crate::constants::{Constants, FIXNUM_MAX, FIXNUM_MIN, MARSHAL_MAGIC};
use crate::error::{Error, Result};
use crate::long::encode_packed_long;

const BUF_INIT: usize = 128;

// Output accumulates in the scratch buffer so a whole small stream goes to
// the sink as one write; past this mark it is flushed early.
const FLUSH_THRESHOLD: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ctx {
    Top,
    Array,
    Hash,
    IVar,
    Object,
    UserMarshal,
    UserDef,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    ctx: Ctx,
    sz: usize,
    pos: usize,
    /// Pair count still to be written onto the wire, for ivar-style frames
    /// whose count byte trails the wrapped value.
    pending: usize,
}

/// A push generator over any [`Write`] sink.
///
/// Every call either emits one value or opens/closes a container. Container
/// sizes are declared up front and enforced: writing past a declared size,
/// closing early, or writing after the single top-level value all fail. The
/// generator owns copies of everything it writes and never retains caller
/// slices.
pub struct Generator<W> {
    sink: W,
    /// Bytes already handed to the sink.
    written: usize,

    buf: Vec<u8>,
    frames: Vec<Frame>,

    sym_tbl: Vec<Vec<u8>>,
    lnk_count: usize,
}

impl<W: Write> Generator<W> {
    pub fn new(sink: W) -> Self {
        let mut gen = Generator {
            sink,
            written: 0,
            buf: Vec::with_capacity(BUF_INIT),
            frames: Vec::new(),
            sym_tbl: Vec::new(),
            lnk_count: 0,
        };
        gen.reset();
        gen
    }

    /// Reverts the generator to its identity state, ready to emit a new
    /// stream. The magic header is buffered lazily, so a reset-then-dropped
    /// generator puts nothing on the wire.
    pub fn reset(&mut self) {
        self.written = 0;
        self.lnk_count = 0;
        self.sym_tbl.clear();
        self.frames.clear();
        self.frames.push(Frame {
            ctx: Ctx::Top,
            sz: 1,
            pos: 0,
            pending: 0,
        });
        self.buf.clear();
        self.buf.extend_from_slice(&MARSHAL_MAGIC);
    }

    /// Releases the underlying sink.
    pub fn into_inner(self) -> W {
        self.sink
    }

    /// Number of symbols interned so far.
    pub fn symbol_count(&self) -> usize {
        self.sym_tbl.len()
    }

    /// Number of linkable values emitted so far; the next linkable value
    /// receives this id.
    pub fn link_count(&self) -> usize {
        self.lnk_count
    }

    /// Writes nil.
    pub fn nil(&mut self) -> Result<()> {
        self.check_write()?;
        self.write_byte(Constants::Nil);
        self.write_adv()
    }

    /// Writes true or false.
    pub fn bool(&mut self, value: bool) -> Result<()> {
        self.check_write()?;
        self.write_byte(if value {
            Constants::True
        } else {
            Constants::False
        });
        self.write_adv()
    }

    /// Writes an integer. Values outside the packed-long range are silently
    /// promoted to bignums, matching how Ruby dumps them.
    pub fn fixnum(&mut self, n: i64) -> Result<()> {
        if !(FIXNUM_MIN..=FIXNUM_MAX).contains(&n) {
            return self.bignum(&BigInt::from(n));
        }
        self.check_write()?;
        self.write_byte(Constants::Fixnum);
        encode_packed_long(n, &mut self.buf);
        self.write_adv()
    }

    /// Writes an arbitrary-precision integer: sign byte, length in 16-bit
    /// words, then the little-endian magnitude padded to an even number of
    /// bytes.
    pub fn bignum(&mut self, value: &BigInt) -> Result<()> {
        self.check_write()?;
        self.register_link();
        self.write_byte(Constants::Bignum);

        let (sign, mut bytes) = value.to_bytes_le();
        self.write_byte(if sign == Sign::Minus {
            Constants::Negative
        } else {
            Constants::Positive
        });

        if bytes.len() % 2 != 0 {
            bytes.push(0);
        }
        encode_packed_long((bytes.len() / 2) as i64, &mut self.buf);
        self.buf.extend_from_slice(&bytes);
        self.write_adv()
    }

    /// Writes a float as its shortest decimal spelling. Infinities, NaN and
    /// negative zero use the spellings Ruby expects.
    pub fn float(&mut self, value: f64) -> Result<()> {
        self.check_write()?;
        self.register_link();
        self.write_byte(Constants::Float);

        let repr = if value.is_nan() {
            String::from("nan")
        } else if value.is_infinite() {
            String::from(if value > 0.0 { "inf" } else { "-inf" })
        } else if value == 0.0 && value.is_sign_negative() {
            String::from("-0")
        } else {
            value.to_string()
        };
        encode_packed_long(repr.len() as i64, &mut self.buf);
        self.buf.extend_from_slice(repr.as_bytes());
        self.write_adv()
    }

    /// Writes a symbol. The first occurrence of a name emits its bytes and
    /// interns it; every later occurrence emits a symlink to the original
    /// id. The table is scanned oldest-first so ids are stable.
    pub fn symbol(&mut self, name: impl AsRef<[u8]>) -> Result<()> {
        self.check_write()?;
        let name = name.as_ref();

        if let Some(id) = self.sym_tbl.iter().position(|s| s.as_slice() == name) {
            self.write_byte(Constants::Symlink);
            encode_packed_long(id as i64, &mut self.buf);
        } else {
            self.write_byte(Constants::Symbol);
            encode_packed_long(name.len() as i64, &mut self.buf);
            self.buf.extend_from_slice(name);
            self.sym_tbl.push(name.to_vec());
        }
        self.write_adv()
    }

    /// Writes a byte string.
    pub fn string(&mut self, value: impl AsRef<[u8]>) -> Result<()> {
        self.check_write()?;
        self.register_link();
        let value = value.as_ref();
        self.write_byte(Constants::String);
        encode_packed_long(value.len() as i64, &mut self.buf);
        self.buf.extend_from_slice(value);
        self.write_adv()
    }

    /// Writes a class reference by name.
    pub fn class(&mut self, name: impl AsRef<[u8]>) -> Result<()> {
        self.named_value(Constants::Class, name.as_ref())
    }

    /// Writes a module reference by name.
    pub fn module(&mut self, name: impl AsRef<[u8]>) -> Result<()> {
        self.named_value(Constants::Module, name.as_ref())
    }

    /// Writes a back-reference to an already-emitted linkable value. A
    /// container may link to itself; its id is claimed when it starts.
    pub fn link(&mut self, id: usize) -> Result<()> {
        self.check_write()?;
        if id >= self.lnk_count {
            return Err(Error::ObjectLinkOutOfRange {
                id,
                table_len: self.lnk_count,
                offset: self.offset(),
            });
        }
        self.write_byte(Constants::Link);
        encode_packed_long(id as i64, &mut self.buf);
        self.write_adv()
    }

    /// Opens an array of `len` elements.
    pub fn start_array(&mut self, len: usize) -> Result<()> {
        self.check_write()?;
        self.register_link();
        self.write_byte(Constants::Array);
        encode_packed_long(len as i64, &mut self.buf);
        self.push_frame(Ctx::Array, len, 0);
        Ok(())
    }

    pub fn end_array(&mut self) -> Result<()> {
        self.end_frame(Ctx::Array)
    }

    /// Opens a hash of `pairs` key/value pairs; keys and values alternate.
    /// Pair order on the wire is the call order.
    pub fn start_hash(&mut self, pairs: usize) -> Result<()> {
        self.check_write()?;
        self.register_link();
        self.write_byte(Constants::Hash);
        encode_packed_long(pairs as i64, &mut self.buf);
        self.push_frame(Ctx::Hash, pairs * 2, 0);
        Ok(())
    }

    pub fn end_hash(&mut self) -> Result<()> {
        self.end_frame(Ctx::Hash)
    }

    /// Opens an instance-variable wrapper holding one value followed by
    /// `vars` (symbol, value) pairs. The count is emitted automatically once
    /// the wrapped value completes.
    pub fn start_ivar(&mut self, vars: usize) -> Result<()> {
        self.check_write()?;
        self.register_link();
        self.write_byte(Constants::InstanceVar);
        self.push_frame(Ctx::IVar, 1 + vars * 2, vars);
        Ok(())
    }

    pub fn end_ivar(&mut self) -> Result<()> {
        self.end_frame(Ctx::IVar)
    }

    /// Opens a plain object: a class-name symbol followed by `vars`
    /// (symbol, value) pairs, with the same deferred count as an ivar
    /// wrapper.
    pub fn start_object(&mut self, vars: usize) -> Result<()> {
        self.check_write()?;
        self.register_link();
        self.write_byte(Constants::Object);
        self.push_frame(Ctx::Object, 1 + vars * 2, vars);
        Ok(())
    }

    pub fn end_object(&mut self) -> Result<()> {
        self.end_frame(Ctx::Object)
    }

    /// Opens a user-marshalled instance: a class-name symbol followed by the
    /// value its `marshal_dump` produced.
    pub fn start_user_marshal(&mut self) -> Result<()> {
        self.check_write()?;
        self.register_link();
        self.write_byte(Constants::UserMarshal);
        self.push_frame(Ctx::UserMarshal, 2, 0);
        Ok(())
    }

    pub fn end_user_marshal(&mut self) -> Result<()> {
        self.end_frame(Ctx::UserMarshal)
    }

    /// Opens a user-defined instance: a class-name symbol followed by one
    /// raw payload written with [`Generator::blob`].
    pub fn start_user_defined(&mut self) -> Result<()> {
        self.check_write()?;
        self.register_link();
        self.write_byte(Constants::UserDefined);
        self.push_frame(Ctx::UserDef, 2, 0);
        Ok(())
    }

    pub fn end_user_defined(&mut self) -> Result<()> {
        self.end_frame(Ctx::UserDef)
    }

    /// Writes the tag-less sized payload of a user-defined instance. Only
    /// valid right after the instance's class-name symbol.
    pub fn blob(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        self.check_write()?;
        let top = self.top();
        if top.ctx != Ctx::UserDef || top.pos != 1 {
            return Err(Error::ContextMismatch {
                offset: self.offset(),
            });
        }
        let data = data.as_ref();
        encode_packed_long(data.len() as i64, &mut self.buf);
        self.buf.extend_from_slice(data);
        self.write_adv()
    }

    fn named_value(&mut self, tag: Constants, name: &[u8]) -> Result<()> {
        self.check_write()?;
        self.register_link();
        self.write_byte(tag);
        encode_packed_long(name.len() as i64, &mut self.buf);
        self.buf.extend_from_slice(name);
        self.write_adv()
    }

    fn write_byte(&mut self, tag: Constants) {
        self.buf.push(tag as u8);
    }

    fn top(&self) -> &Frame {
        self.frames.last().expect("the synthetic top frame is never popped")
    }

    fn offset(&self) -> usize {
        self.written + self.buf.len()
    }

    /// Rejects writes into a full frame before any bytes are produced.
    fn check_write(&self) -> Result<()> {
        let top = self.top();
        if top.pos == top.sz {
            return Err(if self.frames.len() == 1 {
                Error::Finished {
                    offset: self.offset(),
                }
            } else {
                Error::Overflow {
                    offset: self.offset(),
                }
            });
        }
        Ok(())
    }

    /// Assigns the next link id. Mirrors the read side: the value directly
    /// wrapped by an instance-variable container shares the id its `I` byte
    /// claimed.
    fn register_link(&mut self) {
        if let Some(top) = self.frames.last() {
            if top.ctx == Ctx::IVar && top.pos == 0 {
                return;
            }
        }
        self.lnk_count += 1;
    }

    fn push_frame(&mut self, ctx: Ctx, sz: usize, pending: usize) {
        self.frames.push(Frame {
            ctx,
            sz,
            pos: 0,
            pending,
        });
    }

    fn end_frame(&mut self, want: Ctx) -> Result<()> {
        let top = *self.top();
        if top.ctx != want {
            return Err(Error::ContextMismatch {
                offset: self.offset(),
            });
        }
        if top.pos < top.sz {
            return Err(Error::PrematureClose {
                declared: top.sz,
                written: top.pos,
                offset: self.offset(),
            });
        }
        self.frames.pop();
        self.write_adv()
    }

    /// Advances the current frame after a completed value and flushes the
    /// scratch buffer once the top-level value is done (or it has grown past
    /// the high-water mark).
    fn write_adv(&mut self) -> Result<()> {
        let (emit_count, pending) = {
            let top = self.frames.last_mut().expect("top frame");
            top.pos += 1;
            (
                matches!(top.ctx, Ctx::IVar | Ctx::Object) && top.pos == 1,
                top.pending,
            )
        };
        if emit_count {
            encode_packed_long(pending as i64, &mut self.buf);
        }

        let complete = self.frames.len() == 1 && self.frames[0].pos == self.frames[0].sz;
        if complete || self.buf.len() >= FLUSH_THRESHOLD {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.sink.write_all(&self.buf).map_err(|source| Error::Io {
            offset: self.written,
            source,
        })?;
        self.written += self.buf.len();
        self.buf.clear();
        Ok(())
    }
}
