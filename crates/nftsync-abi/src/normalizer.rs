//! Converts alloy `DynSolValue`s into the shapes the event model stores.
//!
//! Integers never pass through floating point: every `uint`/`int` becomes a
//! decimal string of its full width. Addresses become lowercase `0x` hex.

use alloy_dyn_abi::DynSolValue;
use serde_json::Value;

/// JSON form of a decoded value, used for an event's `rawData`.
pub fn to_json(val: &DynSolValue) -> Value {
    match val {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(format!("0x{}", hex::encode(&word.as_slice()[..(*size).min(32)])))
        }
        DynSolValue::Bytes(b) => Value::String(format!("0x{}", hex::encode(b))),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Address(a) => Value::String(format!("{a:#x}")),
        DynSolValue::Function(f) => Value::String(format!("0x{}", hex::encode(f.as_slice()))),
        DynSolValue::Array(vals) | DynSolValue::FixedArray(vals) | DynSolValue::Tuple(vals) => {
            Value::Array(vals.iter().map(to_json).collect())
        }
        #[allow(unreachable_patterns)]
        other => Value::String(format!("{other:?}")),
    }
}

/// Lowercase `0x` address, if the value is an address.
pub fn as_address(val: &DynSolValue) -> Option<String> {
    match val {
        DynSolValue::Address(a) => Some(format!("{a:#x}")),
        _ => None,
    }
}

/// Decimal string of an unsigned integer value.
pub fn as_decimal(val: &DynSolValue) -> Option<String> {
    match val {
        DynSolValue::Uint(u, _) => Some(u.to_string()),
        _ => None,
    }
}

/// An unsigned integer that fits in `u64` (timestamps).
pub fn as_u64(val: &DynSolValue) -> Option<u64> {
    match val {
        DynSolValue::Uint(u, _) => u64::try_from(*u).ok(),
        _ => None,
    }
}

pub fn as_string(val: &DynSolValue) -> Option<String> {
    match val {
        DynSolValue::String(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};

    #[test]
    fn uint256_max_stays_exact() {
        let v = DynSolValue::Uint(U256::MAX, 256);
        let expected = "115792089237316195423570985008687907853269984665640564039457584007913129639935";
        assert_eq!(as_decimal(&v).as_deref(), Some(expected));
        assert_eq!(to_json(&v), Value::String(expected.into()));
        assert_eq!(as_u64(&v), None);
    }

    #[test]
    fn timestamps_fit_u64() {
        let v = DynSolValue::Uint(U256::from(1_700_000_000u64), 256);
        assert_eq!(as_u64(&v), Some(1_700_000_000));
    }

    #[test]
    fn addresses_are_lowercase_hex() {
        let addr: Address = "0x7ab383C0389eEffE0073838C9016151731136143".parse().unwrap();
        let v = DynSolValue::Address(addr);
        assert_eq!(
            as_address(&v).as_deref(),
            Some("0x7ab383c0389eeffe0073838c9016151731136143")
        );
        assert_eq!(as_decimal(&v), None);
    }

    #[test]
    fn strings_pass_through() {
        let v = DynSolValue::String("ipfs://bafy/1.json".into());
        assert_eq!(as_string(&v).as_deref(), Some("ipfs://bafy/1.json"));
        assert_eq!(to_json(&v), Value::String("ipfs://bafy/1.json".into()));
    }
}
