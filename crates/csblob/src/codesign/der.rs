//! DER encoder for entitlement property lists
//!
//! Produces the payload of the DER entitlements blob (slot -7) from a plist
//! value. The encoding uses these ASN.1 tags:
//! - 0x01: BOOLEAN
//! - 0x02: INTEGER
//! - 0x0c: UTF8String
//! - 0x30: SEQUENCE (arrays, and each key/value pair)
//! - 0x31: SET (dictionaries)
//!
//! Dictionary pairs are sorted by their encoded bytes, as DER requires for
//! SET members.

use crate::{Error, Result};
use plist::Value;

const DER_TAG_BOOLEAN: u8 = 0x01;
const DER_TAG_INTEGER: u8 = 0x02;
const DER_TAG_UTF8STRING: u8 = 0x0c;
const DER_TAG_SEQUENCE: u8 = 0x30;
const DER_TAG_SET: u8 = 0x31;

/// Short form below 128, long form (0x80 | byte count, then big-endian)
/// above.
fn write_length(out: &mut Vec<u8>, length: usize) {
    if length < 0x80 {
        out.push(length as u8);
        return;
    }
    let bytes = length.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

fn write_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    write_length(out, content.len());
    out.extend_from_slice(content);
}

/// Minimal two's complement big-endian bytes of `value`.
fn integer_content(value: i128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

fn write_value(out: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Boolean(b) => write_tlv(out, DER_TAG_BOOLEAN, &[if *b { 0xff } else { 0x00 }]),
        Value::Integer(i) => {
            let wide = match (i.as_signed(), i.as_unsigned()) {
                (Some(v), _) => i128::from(v),
                (None, Some(v)) => i128::from(v),
                (None, None) => return Err(Error::UnsupportedEntitlementValue("integer")),
            };
            write_tlv(out, DER_TAG_INTEGER, &integer_content(wide));
        }
        Value::String(s) => write_tlv(out, DER_TAG_UTF8STRING, s.as_bytes()),
        Value::Array(items) => {
            let mut content = Vec::new();
            for item in items {
                write_value(&mut content, item)?;
            }
            write_tlv(out, DER_TAG_SEQUENCE, &content);
        }
        Value::Dictionary(dict) => {
            let mut pairs = Vec::with_capacity(dict.len());
            for (key, item) in dict {
                let mut pair = Vec::new();
                write_tlv(&mut pair, DER_TAG_UTF8STRING, key.as_bytes());
                write_value(&mut pair, item)?;
                let mut encoded = Vec::with_capacity(pair.len() + 4);
                write_tlv(&mut encoded, DER_TAG_SEQUENCE, &pair);
                pairs.push(encoded);
            }
            pairs.sort();
            write_tlv(out, DER_TAG_SET, &pairs.concat());
        }
        Value::Data(_) => return Err(Error::UnsupportedEntitlementValue("data")),
        Value::Date(_) => return Err(Error::UnsupportedEntitlementValue("date")),
        Value::Real(_) => return Err(Error::UnsupportedEntitlementValue("real")),
        _ => return Err(Error::UnsupportedEntitlementValue("unknown")),
    }
    Ok(())
}

/// DER encoding of an entitlements value.
///
/// # Errors
///
/// [`Error::UnsupportedEntitlementValue`] for data, date and real values,
/// which have no entitlement encoding.
pub fn encode_entitlements(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_value(&mut out, value)?;
    Ok(out)
}

/// Parse an XML (or binary) plist and DER-encode it.
///
/// # Arguments
///
/// * `plist` - Entitlements plist bytes
///
/// # Returns
///
/// DER bytes for the payload of an [`EntitlementDerBlob`](super::wrapper::EntitlementDerBlob).
pub fn plist_to_der(plist: &[u8]) -> Result<Vec<u8>> {
    let value: Value = plist::from_bytes(plist)?;
    encode_entitlements(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: Value) -> Vec<u8> {
        encode_entitlements(&value).unwrap()
    }

    #[test]
    fn test_length_forms() {
        let mut buf = Vec::new();
        write_length(&mut buf, 10);
        assert_eq!(buf, vec![10]);

        let mut buf = Vec::new();
        write_length(&mut buf, 128);
        assert_eq!(buf, vec![0x81, 0x80]);

        let mut buf = Vec::new();
        write_length(&mut buf, 256);
        assert_eq!(buf, vec![0x82, 0x01, 0x00]);
    }

    #[test]
    fn test_boolean() {
        assert_eq!(encode(Value::Boolean(true)), vec![0x01, 0x01, 0xff]);
        assert_eq!(encode(Value::Boolean(false)), vec![0x01, 0x01, 0x00]);
    }

    #[test]
    fn test_string() {
        assert_eq!(
            encode(Value::String("test".into())),
            vec![0x0c, 0x04, b't', b'e', b's', b't']
        );
    }

    #[test]
    fn test_integers() {
        assert_eq!(encode(Value::Integer(0.into())), vec![0x02, 0x01, 0x00]);
        assert_eq!(encode(Value::Integer(42.into())), vec![0x02, 0x01, 0x2a]);
        assert_eq!(encode(Value::Integer(128.into())), vec![0x02, 0x02, 0x00, 0x80]);
        assert_eq!(encode(Value::Integer(255.into())), vec![0x02, 0x02, 0x00, 0xff]);
        assert_eq!(encode(Value::Integer(256.into())), vec![0x02, 0x02, 0x01, 0x00]);
        assert_eq!(encode(Value::Integer((-1).into())), vec![0x02, 0x01, 0xff]);
        assert_eq!(encode(Value::Integer((-129).into())), vec![0x02, 0x02, 0xff, 0x7f]);
    }

    #[test]
    fn test_dictionary_pairs_sorted() {
        let mut dict = plist::Dictionary::new();
        dict.insert("b".into(), Value::Boolean(true));
        dict.insert("a".into(), Value::Boolean(false));
        let der = encode(Value::Dictionary(dict));
        assert_eq!(
            der,
            vec![
                0x31, 0x10, //
                0x30, 0x06, 0x0c, 0x01, b'a', 0x01, 0x01, 0x00, //
                0x30, 0x06, 0x0c, 0x01, b'b', 0x01, 0x01, 0xff,
            ]
        );
    }

    #[test]
    fn test_array() {
        let value = Value::Array(vec![Value::String("x".into()), Value::Integer(1.into())]);
        assert_eq!(
            encode(value),
            vec![0x30, 0x06, 0x0c, 0x01, b'x', 0x02, 0x01, 0x01]
        );
    }

    #[test]
    fn test_unsupported_values() {
        assert!(matches!(
            encode_entitlements(&Value::Real(1.5)),
            Err(Error::UnsupportedEntitlementValue("real"))
        ));
        assert!(matches!(
            encode_entitlements(&Value::Data(vec![1])),
            Err(Error::UnsupportedEntitlementValue("data"))
        ));
    }

    #[test]
    fn test_plist_to_der() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>get-task-allow</key>
    <true/>
</dict>
</plist>"#;
        let der = plist_to_der(xml).unwrap();
        assert_eq!(der[0], 0x31);

        let empty = br#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict></dict></plist>"#;
        assert_eq!(plist_to_der(empty).unwrap(), vec![0x31, 0x00]);

        assert!(matches!(plist_to_der(b"not a plist"), Err(Error::Plist(_))));
    }
}
