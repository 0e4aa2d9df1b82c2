//! # marshal-stream
//!
//! **`marshal-stream` reads and writes the Ruby Marshal 4.8 binary format as
//! a token stream.**
//!
//! Instead of materializing a value tree, the crate gives you two small state
//! machines over the wire grammar:
//!
//! - [`Parser`] pulls tokens out of any [`std::io::Read`] source, one
//!   [`Parser::next`] call at a time. Scalars whose decoding is expensive
//!   (floats, bignums, symbols, strings) are kept as byte ranges into the
//!   parser's read buffer and only decoded when an accessor asks, so walking
//!   or skipping structure costs nothing per value.
//! - [`Generator`] pushes a well-formed stream into any [`std::io::Write`]
//!   sink through a sequence of value calls, with explicit `start_*`/`end_*`
//!   pairs for arrays, hashes and instance-variable wrappers. Declared
//!   container sizes are enforced as you write.
//!
//! Both machines keep the per-stream symbol table and object link table the
//! format requires, with matching id assignment, so a parsed stream can be
//! fed back through a generator and reproduce the original bytes.
//!
//! ## Reading
//!
//! ```rust
//! use marshal_stream::{Parser, Token};
//!
//! // 0x04 0x08 magic, then one top-level value: the fixnum 1.
//! let mut parser = Parser::new(&b"\x04\x08i\x06"[..]);
//!
//! assert_eq!(parser.next().unwrap(), Token::Fixnum);
//! assert_eq!(parser.int_value().unwrap(), 1);
//! assert_eq!(parser.next().unwrap(), Token::Eof);
//! ```
//!
//! ## Writing
//!
//! ```rust
//! use marshal_stream::Generator;
//!
//! let mut out = Vec::new();
//! let mut gen = Generator::new(&mut out);
//!
//! gen.start_array(2).unwrap();
//! gen.symbol("name").unwrap();
//! gen.string("marshal-stream").unwrap();
//! gen.end_array().unwrap();
//!
//! assert_eq!(out[..2], [0x04, 0x08]);
//! ```
//!
//! ## Errors
//!
//! Every fallible operation returns an [`Error`] from a closed taxonomy, and
//! every failure detected mid-stream carries the byte offset where it was
//! found. After an error the machine is in an undefined state; call `reset`
//! before reusing it.
//!
//! ## Scope
//!
//! The wire format is Marshal 4.8 exactly as current MRI produces it. Struct,
//! regexp and subclass dumping are not part of the token surface, and string
//! encodings are not interpreted: an encoding instance variable travels
//! through parse and generate untouched.

pub mod constants;
pub mod error;
pub mod generate;
pub mod long;
pub mod parse;

// Convenient re-exports
pub use constants::Constants;
pub use error::{Error, Result};
pub use generate::Generator;
pub use parse::{Parser, Token};
