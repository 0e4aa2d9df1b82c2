//! Streaming pull-parser for Marshal 4.8 byte streams.

use std::borrow::Cow;
use std::io::{self, Read};

use num_bigint::{BigInt, Sign};
use strum_macros::{Display, EnumIs};

use crate::constants::{Constants, MARSHAL_MAGIC};
use crate::error::{Error, Result};
use crate::long::decode_packed_long;

// Initial read buffer size. The buffer doubles whenever it overflows and is
// retained across tokens and resets.
const BUF_INIT: usize = 256;

/// A single value read from the stream.
///
/// Containers arrive as `Start*`/`End*` pairs with their children in between.
/// Scalar payloads (floats, bignums, symbols, strings) are not decoded until
/// one of the accessors on [`Parser`] asks for them.
#[derive(Debug, Display, EnumIs, PartialEq, Eq, Clone, Copy)]
pub enum Token {
    Nil,
    True,
    False,
    Fixnum,
    Float,
    Bignum,
    Symbol,
    String,
    StartArray,
    EndArray,
    StartHash,
    EndHash,
    StartIVar,
    EndIVar,
    StartObject,
    EndObject,
    StartUserMarshal,
    EndUserMarshal,
    StartUserDefined,
    EndUserDefined,
    Class,
    Module,
    Link,
    Eof,
}

/// A pair of positions into the read buffer marking a payload.
#[derive(Debug, Clone, Copy, Default)]
struct Span {
    beg: usize,
    end: usize,
}

/// Progress through an instance-variable style container, which carries its
/// pair count *after* the wrapped value rather than up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// The wrapped value has not been consumed yet.
    Wrapped,
    /// The wrapped value is done; the pair count is the next thing to read.
    Count,
    /// Reading (symbol, value) pairs.
    Pairs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ctx {
    Array,
    Hash,
    IVar(Phase),
    Object(Phase),
    UserMarshal,
    UserDef,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    ctx: Ctx,
    sz: usize,
    pos: usize,
    /// Name of the instance variable currently being read, for ivar-style
    /// frames in the `Pairs` phase.
    name: Span,
}

/// A pull parser over any [`Read`] source.
///
/// The format is read in very small increments, so hand the parser a
/// pre-buffered source. Byte slices returned by [`Parser::bytes`] alias the
/// internal read buffer and are only valid until the next call to
/// [`Parser::next`].
pub struct Parser<R> {
    source: R,

    /// The most recently produced token, `None` before the first `next()`.
    cur: Option<Token>,
    started: bool,

    frames: Vec<Frame>,

    /// Every byte consumed from the stream so far. Growth-only while a
    /// stream is live, so spans stay valid for the whole stream.
    buf: Vec<u8>,
    pos: usize,

    /// Payload range of the current token.
    ctx: Span,
    /// Decoded fixnum, or the id carried by a link token.
    num: i64,
    bignum_sign: u8,

    sym_tbl: Vec<Span>,
    lnk_tbl: Vec<usize>,
}

impl<R: Read> Parser<R> {
    pub fn new(source: R) -> Self {
        Parser {
            source,
            cur: None,
            started: false,
            frames: Vec::new(),
            buf: vec![0; BUF_INIT],
            pos: 0,
            ctx: Span::default(),
            num: 0,
            bignum_sign: Constants::Positive as u8,
            sym_tbl: Vec::new(),
            lnk_tbl: Vec::new(),
        }
    }

    /// Reverts the parser to its identity state, ready for a new stream from
    /// the same source. The grown read buffer is kept.
    pub fn reset(&mut self) {
        self.cur = None;
        self.started = false;
        self.frames.clear();
        self.pos = 0;
        self.ctx = Span::default();
        self.num = 0;
        self.sym_tbl.clear();
        self.lnk_tbl.clear();
    }

    /// Like [`Parser::reset`], but switches to a new byte source.
    pub fn reset_with(&mut self, source: R) {
        self.source = source;
        self.reset();
    }

    /// Releases the underlying byte source.
    pub fn into_inner(self) -> R {
        self.source
    }

    /// Advances to the next token in the stream.
    pub fn next(&mut self) -> Result<Token> {
        if !self.started {
            self.read_magic()?;
        }

        if let Some(&Frame { ctx, sz, pos, .. }) = self.frames.last() {
            match ctx {
                Ctx::IVar(Phase::Count) | Ctx::Object(Phase::Count) => {
                    let n = self.read_long()?;
                    let frame = self.frames.last_mut().expect("counted frame is open");
                    frame.sz = usize::try_from(n).unwrap_or(0);
                    frame.pos = 0;
                    frame.ctx = match frame.ctx {
                        Ctx::IVar(_) => Ctx::IVar(Phase::Pairs),
                        _ => Ctx::Object(Phase::Pairs),
                    };
                    if frame.sz == 0 {
                        return self.finish_frame();
                    }
                    return self.next_pair();
                }
                Ctx::IVar(Phase::Pairs) | Ctx::Object(Phase::Pairs) => {
                    if pos == sz {
                        return self.finish_frame();
                    }
                    return self.next_pair();
                }
                Ctx::IVar(Phase::Wrapped) | Ctx::Object(Phase::Wrapped) => {
                    // The wrapped value is read through the normal path.
                }
                Ctx::UserDef if pos == 1 => {
                    // The payload of a user-defined instance is a bare sized
                    // blob with no tag byte of its own.
                    self.ctx = self.sized_blob(false)?;
                    self.frames.last_mut().expect("open frame").pos += 1;
                    self.cur = Some(Token::String);
                    return Ok(Token::String);
                }
                _ => {
                    if pos == sz {
                        return self.finish_frame();
                    }
                }
            }
        }

        let depth = self.frames.len();
        let tok = self.adv()?;
        if self.frames.len() == depth {
            self.complete_child();
        }
        Ok(tok)
    }

    /// Advances and checks that the produced token is `want`.
    pub fn expect_next(&mut self, want: Token) -> Result<()> {
        let got = self.next()?;
        if got != want {
            return Err(Error::ExpectedToken { got, want });
        }
        Ok(())
    }

    /// Declared element count of the structure just opened: elements for a
    /// `StartArray`, pairs for a `StartHash`, zero for anything else.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        match self.cur {
            Some(Token::StartArray) => self.frames.last().map_or(0, |f| f.sz),
            Some(Token::StartHash) => self.frames.last().map_or(0, |f| f.sz / 2),
            _ => 0,
        }
    }

    /// The id carried by a `Link` token, or the id just assigned to the
    /// current linkable value. `None` for non-linkable tokens.
    pub fn link_id(&self) -> Option<usize> {
        match self.cur? {
            Token::Link => Some(self.num as usize),
            Token::Float
            | Token::Bignum
            | Token::String
            | Token::Class
            | Token::Module
            | Token::StartArray
            | Token::StartHash
            | Token::StartIVar
            | Token::StartObject
            | Token::StartUserMarshal
            | Token::StartUserDefined => self.lnk_tbl.len().checked_sub(1),
            _ => None,
        }
    }

    /// Number of symbols interned so far.
    pub fn symbol_count(&self) -> usize {
        self.sym_tbl.len()
    }

    /// Number of linkable values seen so far.
    pub fn link_count(&self) -> usize {
        self.lnk_tbl.len()
    }

    /// The value of the current `Fixnum` token.
    pub fn int_value(&self) -> Result<i64> {
        match self.cur {
            Some(Token::Fixnum) => Ok(self.num),
            _ => Err(self.wrong_token(Token::Fixnum)),
        }
    }

    /// Decodes the current `Float` token. The text is parsed on every call,
    /// so hold on to the result rather than asking twice.
    pub fn float_value(&self) -> Result<f64> {
        if self.cur != Some(Token::Float) {
            return Err(self.wrong_token(Token::Float));
        }
        let text = String::from_utf8_lossy(&self.buf[self.ctx.beg..self.ctx.end]);
        Ok(text.parse().unwrap_or(0.0))
    }

    /// Assembles the current `Bignum` token into a [`BigInt`].
    pub fn bignum_value(&self) -> Result<BigInt> {
        if self.cur != Some(Token::Bignum) {
            return Err(self.wrong_token(Token::Bignum));
        }
        let sign = if self.bignum_sign == Constants::Negative {
            Sign::Minus
        } else {
            Sign::Plus
        };
        Ok(BigInt::from_bytes_le(sign, &self.buf[self.ctx.beg..self.ctx.end]))
    }

    /// The current payload interpreted as text. Valid for `Float`, `Symbol`,
    /// `String`, `Class` and `Module` tokens.
    pub fn text(&self) -> Result<Cow<'_, str>> {
        match self.cur {
            Some(
                Token::Float | Token::Symbol | Token::String | Token::Class | Token::Module,
            ) => Ok(String::from_utf8_lossy(&self.buf[self.ctx.beg..self.ctx.end])),
            _ => Err(self.wrong_token(Token::String)),
        }
    }

    /// Raw payload bytes of the current token. The slice points into the
    /// internal read buffer; copy it out before calling [`Parser::next`]
    /// again.
    pub fn bytes(&self) -> &[u8] {
        &self.buf[self.ctx.beg..self.ctx.end]
    }

    /// Name of the instance variable whose value is the current token, when
    /// inside the (symbol, value) map of an ivar-style container.
    pub fn ivar_name(&self) -> Option<Cow<'_, str>> {
        let frame = self.frames.last()?;
        match frame.ctx {
            Ctx::IVar(Phase::Pairs) | Ctx::Object(Phase::Pairs) => Some(
                String::from_utf8_lossy(&self.buf[frame.name.beg..frame.name.end]),
            ),
            _ => None,
        }
    }

    fn wrong_token(&self, want: Token) -> Error {
        Error::ExpectedToken {
            got: self.cur.unwrap_or(Token::Eof),
            want,
        }
    }

    fn read_magic(&mut self) -> Result<()> {
        let span = self.fill(2)?;
        let found = [self.buf[span.beg], self.buf[span.beg + 1]];
        if found != MARSHAL_MAGIC {
            return Err(Error::MagicMismatch { found });
        }
        self.started = true;
        Ok(())
    }

    /// Parses one tagged value from the stream. Container tags push a frame
    /// and return their `Start*` token.
    fn adv(&mut self) -> Result<Token> {
        // A zero-byte read is a clean end of stream only between top-level
        // values; anywhere inside a value it stays an error.
        let at_boundary = self.frames.is_empty() && self.cur.is_some();
        let tag_span = match self.fill(1) {
            Ok(span) => span,
            Err(Error::UnexpectedEof { .. }) if at_boundary => {
                self.cur = Some(Token::Eof);
                return Ok(Token::Eof);
            }
            Err(err) => return Err(err),
        };

        let offset = tag_span.beg;
        let byte = self.buf[offset];
        let tag = Constants::from_tag(byte).ok_or(Error::UnknownType { byte, offset })?;

        let tok = match tag {
            Constants::Nil => Token::Nil,
            Constants::True => Token::True,
            Constants::False => Token::False,
            Constants::Fixnum => {
                self.num = self.read_long()?;
                Token::Fixnum
            }
            Constants::Float => {
                self.register_link(offset);
                self.ctx = self.sized_blob(false)?;
                Token::Float
            }
            Constants::Bignum => {
                self.register_link(offset);
                let sign = self.fill(1)?;
                self.bignum_sign = self.buf[sign.beg];
                self.ctx = self.sized_blob(true)?;
                Token::Bignum
            }
            Constants::Symbol => {
                self.ctx = self.sized_blob(false)?;
                self.sym_tbl.push(self.ctx);
                Token::Symbol
            }
            Constants::Symlink => {
                let id = self.read_long()? as usize;
                let span = *self.sym_tbl.get(id).ok_or(Error::SymbolLinkOutOfRange {
                    id,
                    table_len: self.sym_tbl.len(),
                    offset,
                })?;
                self.ctx = span;
                Token::Symbol
            }
            Constants::String => {
                self.register_link(offset);
                self.ctx = self.sized_blob(false)?;
                Token::String
            }
            Constants::Array => {
                self.register_link(offset);
                let n = self.read_long()?;
                self.push_frame(Ctx::Array, usize::try_from(n).unwrap_or(0));
                Token::StartArray
            }
            Constants::Hash => {
                self.register_link(offset);
                let n = self.read_long()?;
                self.push_frame(Ctx::Hash, usize::try_from(n).unwrap_or(0) * 2);
                Token::StartHash
            }
            Constants::InstanceVar => {
                self.register_link(offset);
                self.push_frame(Ctx::IVar(Phase::Wrapped), 0);
                Token::StartIVar
            }
            Constants::Object => {
                self.register_link(offset);
                self.push_frame(Ctx::Object(Phase::Wrapped), 0);
                Token::StartObject
            }
            Constants::UserMarshal => {
                self.register_link(offset);
                self.push_frame(Ctx::UserMarshal, 2);
                Token::StartUserMarshal
            }
            Constants::UserDefined => {
                self.register_link(offset);
                self.push_frame(Ctx::UserDef, 2);
                Token::StartUserDefined
            }
            Constants::Class => {
                self.register_link(offset);
                self.ctx = self.sized_blob(false)?;
                Token::Class
            }
            Constants::Module => {
                self.register_link(offset);
                self.ctx = self.sized_blob(false)?;
                Token::Module
            }
            Constants::Link => {
                let id = self.read_long()? as usize;
                if id >= self.lnk_tbl.len() {
                    return Err(Error::ObjectLinkOutOfRange {
                        id,
                        table_len: self.lnk_tbl.len(),
                        offset,
                    });
                }
                self.num = id as i64;
                Token::Link
            }
            Constants::Positive | Constants::Negative => {
                return Err(Error::UnknownType { byte, offset })
            }
        };

        self.cur = Some(tok);
        Ok(tok)
    }

    /// Consumes one (symbol, value) pair of an ivar-style map and returns
    /// the value token. The pair is counted up front, so a container value
    /// finishing later must not bump the frame again.
    fn next_pair(&mut self) -> Result<Token> {
        self.frames.last_mut().expect("pair frame is open").pos += 1;

        let tok = self.adv()?;
        if tok != Token::Symbol {
            return Err(Error::ExpectedToken {
                got: tok,
                want: Token::Symbol,
            });
        }
        let name = self.ctx;
        self.frames.last_mut().expect("pair frame is open").name = name;

        self.adv()
    }

    /// Emits the `End*` token for the exhausted innermost frame.
    fn finish_frame(&mut self) -> Result<Token> {
        let frame = self.frames.pop().expect("finished frame is open");
        let tok = match frame.ctx {
            Ctx::Array => Token::EndArray,
            Ctx::Hash => Token::EndHash,
            Ctx::IVar(_) => Token::EndIVar,
            Ctx::Object(_) => Token::EndObject,
            Ctx::UserMarshal => Token::EndUserMarshal,
            Ctx::UserDef => Token::EndUserDefined,
        };
        self.cur = Some(tok);
        self.complete_child();
        Ok(tok)
    }

    /// Bookkeeping shared by scalar tokens and popped containers: one child
    /// of the enclosing frame is now complete.
    fn complete_child(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            match frame.ctx {
                Ctx::IVar(Phase::Wrapped) => frame.ctx = Ctx::IVar(Phase::Count),
                Ctx::Object(Phase::Wrapped) => frame.ctx = Ctx::Object(Phase::Count),
                // Pairs are counted when their symbol is read.
                Ctx::IVar(_) | Ctx::Object(_) => {}
                _ => frame.pos += 1,
            }
        }
    }

    fn push_frame(&mut self, ctx: Ctx, sz: usize) {
        self.frames.push(Frame {
            ctx,
            sz,
            pos: 0,
            name: Span::default(),
        });
    }

    /// Assigns the next link id. The value directly wrapped by an
    /// instance-variable container shares the id its `I` byte already
    /// claimed, so it does not register again.
    fn register_link(&mut self, offset: usize) {
        if let Some(frame) = self.frames.last() {
            if frame.ctx == Ctx::IVar(Phase::Wrapped) {
                return;
            }
        }
        self.lnk_tbl.push(offset);
    }

    /// Reads a length-prefixed run of raw bytes. Bignums declare their
    /// length in 16-bit words rather than bytes.
    fn sized_blob(&mut self, words: bool) -> Result<Span> {
        let n = self.read_long()?;
        let mut len = usize::try_from(n).unwrap_or(0);
        if words {
            len *= 2;
        }
        self.fill(len)
    }

    fn read_long(&mut self) -> Result<i64> {
        let start = self.pos;
        let head = self.fill(1)?;
        let c = self.buf[head.beg] as i8;
        let extra = match c {
            -4..=-1 | 1..=4 => c.unsigned_abs() as usize,
            _ => 0,
        };
        if extra > 0 {
            self.fill(extra)?;
        }
        let (n, _) = decode_packed_long(&self.buf[start..self.pos])?;
        Ok(n)
    }

    /// Pulls `len` bytes from the source into the read buffer, growing it as
    /// needed. The buffer is never compacted while a stream is live, so
    /// previously returned spans stay valid.
    fn fill(&mut self, len: usize) -> Result<Span> {
        let span = Span {
            beg: self.pos,
            end: self.pos + len,
        };

        if span.end > self.buf.len() {
            let mut cap = self.buf.len().max(BUF_INIT);
            while cap < span.end {
                cap *= 2;
            }
            self.buf.resize(cap, 0);
        }

        while self.pos < span.end {
            match self.source.read(&mut self.buf[self.pos..span.end]) {
                Ok(0) => return Err(Error::UnexpectedEof { offset: self.pos }),
                Ok(n) => self.pos += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => {
                    return Err(Error::Io {
                        offset: self.pos,
                        source,
                    })
                }
            }
        }

        Ok(span)
    }
}
