use proptest::prelude::*;

use crate::cursor::round_up;
use crate::protocol::{field, Flags};
use crate::signature::parse;
use crate::Value;

use super::{frame_len, MessageBuilder, MessageKind, MessageReader};

#[test]
fn hello_prefix() {
    let mut m = MessageBuilder::method_call("/org/freedesktop/DBus", "Hello")
        .with_destination("org.freedesktop.DBus")
        .build(&[], &[])
        .unwrap();

    m.stamp_serial(1);

    let bytes = m.as_bytes();
    assert_eq!(&bytes[..4], &[b'l', 1, 0, 1]);
    // Empty body.
    assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
    // The stamped serial.
    assert_eq!(&bytes[8..12], &[1, 0, 0, 0]);

    let reader = MessageReader::new(bytes).unwrap();
    assert_eq!(reader.kind(), MessageKind::MethodCall);
    assert_eq!(reader.serial(), 1);
    assert_eq!(reader.body_length(), 0);
    assert_eq!(reader.path().unwrap().as_deref(), Some("/org/freedesktop/DBus"));
    assert_eq!(reader.member().unwrap().as_deref(), Some("Hello"));
    assert_eq!(
        reader.destination().unwrap().as_deref(),
        Some("org.freedesktop.DBus")
    );
    // No SIGNATURE header when the body is empty.
    assert_eq!(reader.find_header(field::SIGNATURE).unwrap(), None);
}

#[test]
fn body_roundtrip() {
    let codecs = parse("sai").unwrap();
    let body = vec![
        Value::Str("hello".into()),
        Value::Array(vec![Value::Int32(-1), Value::Int32(2)]),
    ];

    let m = MessageBuilder::method_call("/com/example/Object", "Frob")
        .with_interface("com.example.Iface")
        .build(&codecs, &body)
        .unwrap();

    let reader = MessageReader::new(m.as_bytes()).unwrap();
    assert_eq!(reader.body_signature().unwrap().as_deref(), Some("sai"));
    assert_eq!(reader.read_body(&codecs).unwrap(), body);
}

#[test]
fn body_starts_at_rounded_header_end() {
    let codecs = parse("y").unwrap();
    let m = MessageBuilder::method_call("/a", "B")
        .build(&codecs, &[Value::Byte(0xab)])
        .unwrap();

    let reader = MessageReader::new(m.as_bytes()).unwrap();
    let start = round_up(16 + reader.fields_length() as usize, 8);
    assert_eq!(reader.body_start(), start);
    assert_eq!(m.as_bytes()[start], 0xab);
    assert_eq!(reader.body_length(), 1);
    assert_eq!(m.as_bytes().len(), start + 1);
}

#[test]
fn error_reply_headers() {
    let m = MessageBuilder::error("com.example.Error.Failed", 42)
        .build(&[], &[])
        .unwrap();

    let reader = MessageReader::new(m.as_bytes()).unwrap();
    assert_eq!(reader.kind(), MessageKind::Error);
    assert_eq!(reader.reply_serial().unwrap(), Some(42));
    assert_eq!(
        reader.error_name().unwrap().as_deref(),
        Some("com.example.Error.Failed")
    );
}

#[test]
fn flags_are_patched_into_the_prefix() {
    let m = MessageBuilder::method_call("/a", "B")
        .with_flags(Flags::NO_REPLY_EXPECTED)
        .build(&[], &[])
        .unwrap();

    assert_eq!(m.as_bytes()[2], 1);
    assert!(!m.expects_reply());

    let m = MessageBuilder::method_call("/a", "B").build(&[], &[]).unwrap();
    assert!(m.expects_reply());
}

#[test]
fn set_header_enforces_pairings() {
    let mut m = MessageBuilder::new(MessageKind::MethodCall);
    assert!(m.set_header(field::PATH, Value::Str("/a".into())).is_err());
    assert!(m
        .set_header(field::PATH, Value::ObjectPath("/a".into()))
        .is_ok());
    assert!(m.set_header(field::REPLY_SERIAL, Value::Uint32(1)).is_ok());
    assert!(m
        .set_header(field::REPLY_SERIAL, Value::Int32(1))
        .is_err());
}

#[test]
fn big_endian_message_is_accepted() {
    // A hand-built big-endian method return with serial 5 answering call 9.
    let bytes = [
        b'B', 2, 0, 1, // prefix
        0, 0, 0, 0, // body length
        0, 0, 0, 5, // serial
        0, 0, 0, 8, // header fields length
        5, 1, b'u', 0, // REPLY_SERIAL entry, variant signature "u"
        0, 0, 0, 9, // value
    ];

    let reader = MessageReader::new(&bytes).unwrap();
    assert_eq!(reader.kind(), MessageKind::MethodReturn);
    assert_eq!(reader.serial(), 5);
    assert_eq!(reader.reply_serial().unwrap(), Some(9));
}

#[test]
fn malformed_prefixes_are_rejected() {
    let ok = {
        let mut m = MessageBuilder::method_call("/a", "B").build(&[], &[]).unwrap();
        m.stamp_serial(1);
        m.bytes
    };

    let mut bad_endianness = ok.clone();
    bad_endianness[0] = b'x';
    assert!(MessageReader::new(&bad_endianness).is_err());

    let mut bad_kind = ok.clone();
    bad_kind[1] = 9;
    assert!(MessageReader::new(&bad_kind).is_err());

    let mut bad_version = ok.clone();
    bad_version[3] = 2;
    assert!(MessageReader::new(&bad_version).is_err());

    // Declared lengths overflowing the buffer are caught up front.
    let mut truncated = ok;
    truncated[4] = 32;
    assert!(MessageReader::new(&truncated).is_err());
}

#[test]
fn unknown_header_field_type_is_rejected() {
    let bytes = [
        b'l', 4, 0, 1, // prefix
        0, 0, 0, 0, // body length
        1, 0, 0, 0, // serial
        8, 0, 0, 0, // header fields length
        3, 1, b'w', 0, // entry with an unknown value type
        0, 0, 0, 0,
    ];

    let reader = MessageReader::new(&bytes).unwrap();
    assert!(reader.find_header(field::MEMBER).is_err());
}

fn arb_body() -> impl Strategy<Value = (String, Vec<Value>)> {
    prop_oneof![
        Just((String::new(), vec![])),
        Just(("y".to_owned(), vec![Value::Byte(1)])),
        Just(("yi".to_owned(), vec![Value::Byte(7), Value::Int32(-3)])),
        Just(("s".to_owned(), vec![Value::Str("abc".into())])),
        Just((
            "as".to_owned(),
            vec![Value::Array(vec![
                Value::Str("hi".into()),
                Value::Str("yo".into())
            ])]
        )),
        Just((
            "(ss)x".to_owned(),
            vec![
                Value::Struct(vec![Value::Str("a".into()), Value::Str("b".into())]),
                Value::Int64(i64::MIN),
            ]
        )),
    ]
}

proptest! {
    #[test]
    fn prop_message_framing_law(
        (signature, body) in arb_body(),
        member in "[A-Za-z][A-Za-z0-9]{0,12}",
        destination in proptest::option::of("[a-z]{1,8}\\.[a-z]{1,8}"),
    ) {
        let codecs = parse(&signature).unwrap();
        let mut builder = MessageBuilder::method_call("/com/example/Object", &member);

        if let Some(destination) = &destination {
            builder = builder.with_destination(destination);
        }

        let m = builder.build(&codecs, &body).unwrap();
        let reader = MessageReader::new(m.as_bytes()).unwrap();

        // body_length == total_len - round_up(16 + fields_length, 8)
        let expected = m.as_bytes().len() - round_up(16 + reader.fields_length() as usize, 8);
        prop_assert_eq!(reader.body_length() as usize, expected);

        // The reassembly framing computation agrees with the built length.
        prop_assert_eq!(frame_len(m.as_bytes()).unwrap(), Some(m.as_bytes().len()));

        prop_assert_eq!(reader.read_body(&codecs).unwrap(), body);
    }
}
