//! COSE_Key (CBOR) decoding for WebAuthn-attested public keys (§4.1 step 4).

use crate::error::{Error, Result};
use ciborium::value::Value as CborValue;

/// A decoded COSE EC2 P-256 public key.
#[derive(Debug, Clone)]
pub struct CoseEc2Key {
    /// SEC1 uncompressed point: `0x04 || x || y`.
    pub sec1_point: Vec<u8>,
}

/// Decode a COSE_Key (CBOR map) produced by a WebAuthn authenticator.
///
/// Only EC2 keys on the P-256 curve (COSE curve id 1) are supported, which is
/// what every passkey authenticator in practice emits for ECDSA credentials.
pub fn decode_cose_ec2_key(cose_bytes: &[u8]) -> Result<CoseEc2Key> {
    let value: CborValue =
        ciborium::de::from_reader(cose_bytes).map_err(|e| Error::Cbor(e.to_string()))?;
    let map = value
        .as_map()
        .ok_or_else(|| Error::Cbor("COSE key is not a CBOR map".into()))?;

    let get_int = |label: i128| -> Option<&CborValue> {
        map.iter().find_map(|(k, v)| match k.as_integer() {
            Some(i) if i128::from(i) == label => Some(v),
            _ => None,
        })
    };

    // kty (label 1) must be EC2 (2)
    let kty = get_int(1).and_then(CborValue::as_integer).map(i128::from);
    if kty != Some(2) {
        return Err(Error::Cbor(format!("unsupported COSE kty: {kty:?}")));
    }

    // crv (label -1) must be P-256 (1)
    let crv = get_int(-1).and_then(CborValue::as_integer).map(i128::from);
    if crv != Some(1) {
        return Err(Error::Cbor(format!("unsupported COSE curve: {crv:?}")));
    }

    // x (label -2), y (label -3): byte strings
    let x = get_int(-2)
        .and_then(CborValue::as_bytes)
        .ok_or_else(|| Error::Cbor("missing COSE x coordinate".into()))?;
    let y = get_int(-3)
        .and_then(CborValue::as_bytes)
        .ok_or_else(|| Error::Cbor("missing COSE y coordinate".into()))?;

    if x.len() != 32 || y.len() != 32 {
        return Err(Error::Cbor("P-256 coordinates must be 32 bytes".into()));
    }

    let mut sec1_point = Vec::with_capacity(65);
    sec1_point.push(0x04);
    sec1_point.extend_from_slice(x);
    sec1_point.extend_from_slice(y);

    Ok(CoseEc2Key { sec1_point })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ciborium::value::Value;

    fn encode_ec2(x: [u8; 32], y: [u8; 32]) -> Vec<u8> {
        let map = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(2.into())), // kty: EC2
            (Value::Integer(3.into()), Value::Integer((-7).into())), // alg: ES256
            (Value::Integer((-1).into()), Value::Integer(1.into())), // crv: P-256
            (Value::Integer((-2).into()), Value::Bytes(x.to_vec())),
            (Value::Integer((-3).into()), Value::Bytes(y.to_vec())),
        ]);
        let mut out = Vec::new();
        ciborium::ser::into_writer(&map, &mut out).unwrap();
        out
    }

    #[test]
    fn decodes_valid_ec2_key() {
        let bytes = encode_ec2([0x11; 32], [0x22; 32]);
        let decoded = decode_cose_ec2_key(&bytes).unwrap();
        assert_eq!(decoded.sec1_point.len(), 65);
        assert_eq!(decoded.sec1_point[0], 0x04);
    }

    #[test]
    fn rejects_wrong_curve() {
        let map = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(2.into())),
            (Value::Integer((-1).into()), Value::Integer(2.into())), // crv: P-384, unsupported
            (Value::Integer((-2).into()), Value::Bytes(vec![0u8; 32])),
            (Value::Integer((-3).into()), Value::Bytes(vec![0u8; 32])),
        ]);
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&map, &mut bytes).unwrap();
        assert!(decode_cose_ec2_key(&bytes).is_err());
    }
}
