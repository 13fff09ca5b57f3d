//! Serde adapter writing `BigUint` as a bare JSON integer.
//!
//! DH values are 2048-bit numbers. They travel as JSON number literals with no
//! precision loss, so the adapter goes through `RawValue` instead of `u64`.

use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _, ser::Error as _};
use serde_json::value::RawValue;

pub(crate) fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
    let raw = RawValue::from_string(value.to_str_radix(10)).map_err(S::Error::custom)?;
    raw.serialize(serializer)
}

pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
    let raw = Box::<RawValue>::deserialize(deserializer)?;
    let digits = raw.get();

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(D::Error::custom(format!("expected non-negative integer, got {digits}")));
    }

    BigUint::parse_bytes(digits.as_bytes(), 10)
        .ok_or_else(|| D::Error::custom("integer out of range"))
}
