use marshal_stream::{Error, Parser, Token};
use num_bigint::BigInt;
use std::str::FromStr;

fn parser(bytes: &[u8]) -> Parser<&[u8]> {
    Parser::new(bytes)
}

#[test]
fn invalid_magic() {
    let mut p = parser(b"\x04\x090");
    assert!(matches!(
        p.next(),
        Err(Error::MagicMismatch { found: [0x04, 0x09] })
    ));
}

#[test]
fn null() {
    let mut p = parser(b"\x04\x080");
    assert_eq!(p.next().unwrap(), Token::Nil);
    assert_eq!(p.next().unwrap(), Token::Eof);
    // EOF is sticky.
    assert_eq!(p.next().unwrap(), Token::Eof);
}

#[test]
fn boolean() {
    let mut p = parser(b"\x04\x08T");
    assert_eq!(p.next().unwrap(), Token::True);

    let mut p = parser(b"\x04\x08F");
    assert_eq!(p.next().unwrap(), Token::False);
}

#[test]
fn fixnum_positive() {
    for (bytes, want) in [
        (&b"\x04\x08i\x00"[..], 0),
        (&b"\x04\x08i\x06"[..], 1),
        (&b"\x04\x08i\x7F"[..], 122),
        (&b"\x04\x08i\x02\x2C\x01"[..], 300),
        (&b"\x04\x08i\x02\xAD\xDE"[..], 0xDEAD),
        (&b"\x04\x08i\x03\x70\x11\x01"[..], 70000),
        (&b"\x04\x08i\x04\x00\x00\x00\x01"[..], 16777216),
    ] {
        let mut p = parser(bytes);
        assert_eq!(p.next().unwrap(), Token::Fixnum);
        assert_eq!(p.int_value().unwrap(), want);
        assert_eq!(p.next().unwrap(), Token::Eof);
    }
}

#[test]
fn fixnum_negative() {
    for (bytes, want) in [
        (&b"\x04\x08i\xFA"[..], -1),
        (&b"\x04\x08i\xF6"[..], -5),
        (&b"\x04\x08i\xFE\xD4\xFE"[..], -300),
        (&b"\x04\x08i\xFE\x53\x21"[..], -0xDEAD),
        (&b"\x04\x08i\xFD\x90\xEE\xFE"[..], -70000),
    ] {
        let mut p = parser(bytes);
        assert_eq!(p.next().unwrap(), Token::Fixnum);
        assert_eq!(p.int_value().unwrap(), want);
    }
}

#[test]
fn float() {
    let mut p = parser(b"\x04\x08f\x0C3.14159");
    assert_eq!(p.next().unwrap(), Token::Float);
    assert_eq!(p.float_value().unwrap(), 3.14159);
    assert_eq!(p.text().unwrap(), "3.14159");
    assert_eq!(p.link_id(), Some(0));

    let mut p = parser(b"\x04\x08f\x0D-2.71828");
    assert_eq!(p.next().unwrap(), Token::Float);
    assert_eq!(p.float_value().unwrap(), -2.71828);

    let mut p = parser(b"\x04\x08f\x07-0");
    assert_eq!(p.next().unwrap(), Token::Float);
    let zero = p.float_value().unwrap();
    assert_eq!(zero, 0.0);
    assert!(zero.is_sign_negative());

    let mut p = parser(b"\x04\x08f\x08inf");
    assert_eq!(p.next().unwrap(), Token::Float);
    assert_eq!(p.float_value().unwrap(), f64::INFINITY);
}

#[test]
fn bignum() {
    let mut p = parser(b"\x04\x08l+\n\x00\x00\x00\x00\x00\x00\x00\x00\x02\x00");
    assert_eq!(p.next().unwrap(), Token::Bignum);
    assert_eq!(
        p.bignum_value().unwrap(),
        BigInt::from_str("36893488147419103232").unwrap()
    );

    let mut p = parser(b"\x04\x08l-\n\x00\x00\x00\x00\x00\x00\x00\x00\x02\x00");
    assert_eq!(p.next().unwrap(), Token::Bignum);
    assert_eq!(
        p.bignum_value().unwrap(),
        BigInt::from_str("-36893488147419103232").unwrap()
    );

    let mut p = parser(b"\x04\x08l+\x08\xEF\xBE\xFE\xCA\xAD\xDE");
    assert_eq!(p.next().unwrap(), Token::Bignum);
    assert_eq!(p.bignum_value().unwrap(), BigInt::from(0xDEADCAFEBEEFi64));
    assert_eq!(p.link_id(), Some(0));
}

#[test]
fn string() {
    let mut p = parser(b"\x04\x08\"\x09test");
    assert_eq!(p.next().unwrap(), Token::String);
    assert_eq!(p.text().unwrap(), "test");
    assert_eq!(p.bytes(), b"test");
    assert_eq!(p.link_id(), Some(0));
    assert_eq!(p.next().unwrap(), Token::Eof);
}

#[test]
fn empty_scalars() {
    let mut p = parser(b"\x04\x08\"\x00");
    assert_eq!(p.next().unwrap(), Token::String);
    assert_eq!(p.bytes(), b"");

    let mut p = parser(b"\x04\x08:\x00");
    assert_eq!(p.next().unwrap(), Token::Symbol);
    assert_eq!(p.bytes(), b"");
    assert_eq!(p.symbol_count(), 1);
}

#[test]
fn symbols_and_symlinks() {
    let mut p = parser(b"\x04\x08[\x09:\x08foo:\x08bar;\x06;\x00");
    assert_eq!(p.next().unwrap(), Token::StartArray);
    assert_eq!(p.len(), 4);

    for want in ["foo", "bar", "bar", "foo"] {
        assert_eq!(p.next().unwrap(), Token::Symbol);
        assert_eq!(p.text().unwrap(), want);
    }

    assert_eq!(p.next().unwrap(), Token::EndArray);
    assert_eq!(p.next().unwrap(), Token::Eof);
    assert_eq!(p.symbol_count(), 2);
}

#[test]
fn ivar_string() {
    let mut p = parser(b"\x04\x08I\"\x11Short string\x06:\x06ET");

    assert_eq!(p.next().unwrap(), Token::StartIVar);
    assert_eq!(p.link_id(), Some(0));

    // The wrapped value shares the id the wrapper claimed.
    assert_eq!(p.next().unwrap(), Token::String);
    assert_eq!(p.text().unwrap(), "Short string");
    assert_eq!(p.link_id(), Some(0));

    assert_eq!(p.next().unwrap(), Token::True);
    assert_eq!(p.ivar_name().unwrap(), "E");

    assert_eq!(p.next().unwrap(), Token::EndIVar);
    assert_eq!(p.next().unwrap(), Token::Eof);
    assert_eq!(p.link_count(), 1);
}

#[test]
fn ivar_string_with_named_encoding() {
    let mut p = parser(b"\x04\x08I\"\x0b\xBA\xBA\xD7\xD6\xC4\xDA\x06:\rencoding\"\x08GBK");

    assert_eq!(p.next().unwrap(), Token::StartIVar);
    assert_eq!(p.next().unwrap(), Token::String);
    assert_eq!(p.bytes(), b"\xBA\xBA\xD7\xD6\xC4\xDA");

    assert_eq!(p.next().unwrap(), Token::String);
    assert_eq!(p.ivar_name().unwrap(), "encoding");
    assert_eq!(p.text().unwrap(), "GBK");

    assert_eq!(p.next().unwrap(), Token::EndIVar);
    assert_eq!(p.next().unwrap(), Token::Eof);
    // The wrapped string shares the wrapper's id; "GBK" gets its own.
    assert_eq!(p.link_count(), 2);
}

#[test]
fn array() {
    let mut p = parser(b"\x04\x08[\x08i\x06T0");
    assert_eq!(p.next().unwrap(), Token::StartArray);
    assert_eq!(p.len(), 3);
    assert_eq!(p.next().unwrap(), Token::Fixnum);
    assert_eq!(p.int_value().unwrap(), 1);
    assert_eq!(p.next().unwrap(), Token::True);
    assert_eq!(p.next().unwrap(), Token::Nil);
    assert_eq!(p.next().unwrap(), Token::EndArray);
    assert_eq!(p.next().unwrap(), Token::Eof);
}

#[test]
fn nested_arrays() {
    let mut p = parser(b"\x04\x08[\x06[\x00");
    assert_eq!(p.next().unwrap(), Token::StartArray);
    assert_eq!(p.next().unwrap(), Token::StartArray);
    assert_eq!(p.len(), 0);
    assert_eq!(p.next().unwrap(), Token::EndArray);
    assert_eq!(p.next().unwrap(), Token::EndArray);
    assert_eq!(p.next().unwrap(), Token::Eof);
}

#[test]
fn empty_containers() {
    let mut p = parser(b"\x04\x08[\x00");
    assert_eq!(p.next().unwrap(), Token::StartArray);
    assert_eq!(p.next().unwrap(), Token::EndArray);

    let mut p = parser(b"\x04\x08{\x00");
    assert_eq!(p.next().unwrap(), Token::StartHash);
    assert_eq!(p.next().unwrap(), Token::EndHash);
}

#[test]
fn hash() {
    let mut p = parser(b"\x04\x08{\x07i\x06\"\x08onei\x07\"\x08two");
    assert_eq!(p.next().unwrap(), Token::StartHash);
    assert_eq!(p.len(), 2);

    assert_eq!(p.next().unwrap(), Token::Fixnum);
    assert_eq!(p.int_value().unwrap(), 1);
    assert_eq!(p.next().unwrap(), Token::String);
    assert_eq!(p.text().unwrap(), "one");

    assert_eq!(p.next().unwrap(), Token::Fixnum);
    assert_eq!(p.int_value().unwrap(), 2);
    assert_eq!(p.next().unwrap(), Token::String);
    assert_eq!(p.text().unwrap(), "two");

    assert_eq!(p.next().unwrap(), Token::EndHash);
    assert_eq!(p.next().unwrap(), Token::Eof);
}

#[test]
fn links() {
    // [[0.1, 0.1, 0.1], [0.2, 0.2, 0.2], [0.3, 0.3, 0.3]] with every inner
    // array sharing one float instance.
    let mut p = parser(
        b"\x04\x08[\x08[\x08f\x080.1@\x07@\x07[\x08f\x080.2@\x09@\x09[\x08f\x080.3@\x0b@\x0b",
    );

    assert_eq!(p.next().unwrap(), Token::StartArray);
    for (float_id, value) in [(2usize, 0.1), (4, 0.2), (6, 0.3)] {
        assert_eq!(p.next().unwrap(), Token::StartArray);
        assert_eq!(p.next().unwrap(), Token::Float);
        assert_eq!(p.float_value().unwrap(), value);
        assert_eq!(p.link_id(), Some(float_id));
        for _ in 0..2 {
            assert_eq!(p.next().unwrap(), Token::Link);
            assert_eq!(p.link_id(), Some(float_id));
        }
        assert_eq!(p.next().unwrap(), Token::EndArray);
    }
    assert_eq!(p.next().unwrap(), Token::EndArray);
    assert_eq!(p.next().unwrap(), Token::Eof);
    assert_eq!(p.link_count(), 7);
}

#[test]
fn self_referential_array() {
    let mut p = parser(b"\x04\x08[\x06@\x00");
    assert_eq!(p.next().unwrap(), Token::StartArray);
    assert_eq!(p.link_id(), Some(0));
    assert_eq!(p.next().unwrap(), Token::Link);
    assert_eq!(p.link_id(), Some(0));
    assert_eq!(p.next().unwrap(), Token::EndArray);
    assert_eq!(p.next().unwrap(), Token::Eof);
}

#[test]
fn class_and_module() {
    let mut p = parser(b"\x04\x08c\x11Gem::Version");
    assert_eq!(p.next().unwrap(), Token::Class);
    assert_eq!(p.text().unwrap(), "Gem::Version");
    assert_eq!(p.link_id(), Some(0));

    let mut p = parser(b"\x04\x08m\x08Gem");
    assert_eq!(p.next().unwrap(), Token::Module);
    assert_eq!(p.text().unwrap(), "Gem");
}

#[test]
fn object() {
    let mut p = parser(b"\x04\x08o:\x11CustomObject\x06:\x0a@dataI\"\x10object data\x06:\x06ET");

    assert_eq!(p.next().unwrap(), Token::StartObject);
    assert_eq!(p.link_id(), Some(0));

    assert_eq!(p.next().unwrap(), Token::Symbol);
    assert_eq!(p.text().unwrap(), "CustomObject");

    assert_eq!(p.next().unwrap(), Token::StartIVar);
    assert_eq!(p.next().unwrap(), Token::String);
    assert_eq!(p.text().unwrap(), "object data");
    assert_eq!(p.next().unwrap(), Token::True);
    assert_eq!(p.ivar_name().unwrap(), "E");
    assert_eq!(p.next().unwrap(), Token::EndIVar);

    assert_eq!(p.next().unwrap(), Token::EndObject);
    assert_eq!(p.next().unwrap(), Token::Eof);
    assert_eq!(p.link_count(), 2);
    assert_eq!(p.symbol_count(), 3);
}

#[test]
fn user_marshal() {
    let mut p = parser(b"\x04\x08U:\x11Gem::Version[\x06I\"\x0a1.2.3\x06:\x06ET");

    assert_eq!(p.next().unwrap(), Token::StartUserMarshal);
    assert_eq!(p.next().unwrap(), Token::Symbol);
    assert_eq!(p.text().unwrap(), "Gem::Version");

    assert_eq!(p.next().unwrap(), Token::StartArray);
    assert_eq!(p.next().unwrap(), Token::StartIVar);
    assert_eq!(p.next().unwrap(), Token::String);
    assert_eq!(p.text().unwrap(), "1.2.3");
    assert_eq!(p.next().unwrap(), Token::True);
    assert_eq!(p.next().unwrap(), Token::EndIVar);
    assert_eq!(p.next().unwrap(), Token::EndArray);

    assert_eq!(p.next().unwrap(), Token::EndUserMarshal);
    assert_eq!(p.next().unwrap(), Token::Eof);
}

#[test]
fn user_defined() {
    let mut p = parser(b"\x04\x08u:\x08Foo\x09abcd");

    assert_eq!(p.next().unwrap(), Token::StartUserDefined);
    assert_eq!(p.next().unwrap(), Token::Symbol);
    assert_eq!(p.text().unwrap(), "Foo");

    // The payload is a bare sized blob surfaced as a string.
    assert_eq!(p.next().unwrap(), Token::String);
    assert_eq!(p.bytes(), b"abcd");

    assert_eq!(p.next().unwrap(), Token::EndUserDefined);
    assert_eq!(p.next().unwrap(), Token::Eof);
}

#[test]
fn unknown_type() {
    let mut p = parser(b"\x04\x08S:\x0bPerson\x00");
    assert!(matches!(
        p.next(),
        Err(Error::UnknownType {
            byte: b'S',
            offset: 2
        })
    ));
}

#[test]
fn symlink_out_of_range() {
    let mut p = parser(b"\x04\x08;\x00");
    assert!(matches!(
        p.next(),
        Err(Error::SymbolLinkOutOfRange {
            id: 0,
            table_len: 0,
            ..
        })
    ));
}

#[test]
fn object_link_out_of_range() {
    let mut p = parser(b"\x04\x08@\x06");
    assert!(matches!(
        p.next(),
        Err(Error::ObjectLinkOutOfRange {
            id: 1,
            table_len: 0,
            ..
        })
    ));
}

#[test]
fn truncated_streams() {
    // Bare magic: a stream must hold one value.
    let mut p = parser(b"\x04\x08");
    assert!(matches!(p.next(), Err(Error::UnexpectedEof { .. })));

    // Tag with its payload cut off.
    let mut p = parser(b"\x04\x08i");
    assert!(matches!(p.next(), Err(Error::UnexpectedEof { .. })));

    // Declared string length longer than the data.
    let mut p = parser(b"\x04\x08\"\x10\xf0(\x8c(");
    assert!(matches!(p.next(), Err(Error::UnexpectedEof { .. })));

    // EOF inside an open container is never a clean end.
    let mut p = parser(b"\x04\x08[\x06");
    assert_eq!(p.next().unwrap(), Token::StartArray);
    assert!(matches!(p.next(), Err(Error::UnexpectedEof { .. })));
}

#[test]
fn expect_next() {
    let mut p = parser(b"\x04\x08[\x06i\x06");
    p.expect_next(Token::StartArray).unwrap();
    let err = p.expect_next(Token::String).unwrap_err();
    assert!(matches!(
        err,
        Error::ExpectedToken {
            got: Token::Fixnum,
            want: Token::String
        }
    ));
}

#[test]
fn accessor_on_wrong_token() {
    let mut p = parser(b"\x04\x080");
    assert_eq!(p.next().unwrap(), Token::Nil);
    assert!(matches!(
        p.int_value(),
        Err(Error::ExpectedToken {
            got: Token::Nil,
            want: Token::Fixnum
        })
    ));
    assert!(p.text().is_err());
    assert!(p.link_id().is_none());
    assert!(p.ivar_name().is_none());
}

#[test]
fn reset_reuses_the_parser() {
    let mut p = parser(b"\x04\x08:\x08foo");
    assert_eq!(p.next().unwrap(), Token::Symbol);
    assert_eq!(p.symbol_count(), 1);

    p.reset_with(b"\x04\x08i\x7F");
    assert_eq!(p.symbol_count(), 0);
    assert_eq!(p.next().unwrap(), Token::Fixnum);
    assert_eq!(p.int_value().unwrap(), 122);
    assert_eq!(p.next().unwrap(), Token::Eof);
}
