//! Payload parameter extraction for the simple method handlers.

use std::io::Read;

use shv_chainpack::{ChainPackReader, Item};

use crate::error::Result;
use crate::meta::KEY_PARAMS;

/// Numeric parameter pulled out of a payload.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct NumberParam {
    /// Integer view; set for Int and UInt parameters.
    pub int: Option<i64>,
    /// Floating point view; set for Int, UInt, Decimal and Double.
    pub double: Option<f64>,
}

/// Drain one payload container, capturing the first numeric value stored
/// under key 1 (params) at the top level. Integers are promoted to double,
/// decimals expand as `mantissa · 10^exponent`, nested containers are
/// walked over. Getters use this purely to consume the payload; setters
/// read the captured number.
pub fn read_param_number<R: Read>(reader: &mut ChainPackReader<R>) -> Result<NumberParam> {
    let mut out = NumberParam::default();

    let first = reader.next()?;
    if !first.opens_container() {
        reader.discard_item(&first)?;
        return Ok(out);
    }

    let mut depth = 1u32;
    // 1: awaiting the params key, 2: the next scalar is the value, 0: done.
    let mut key_state = 1u8;

    while depth > 0 {
        let item = reader.next()?;
        if item.opens_container() {
            depth += 1;
            continue;
        }
        if matches!(item, Item::ContainerEnd) {
            depth -= 1;
            continue;
        }

        if depth == 1 {
            match key_state {
                1 => {
                    key_state = if item.as_int() == Some(KEY_PARAMS) { 2 } else { 0 };
                }
                2 => {
                    match item {
                        Item::Int(v) => {
                            out.int = Some(v);
                            out.double = Some(v as f64);
                        }
                        Item::UInt(v) => {
                            out.int = i64::try_from(v).ok();
                            out.double = Some(v as f64);
                        }
                        Item::Decimal(d) => out.double = Some(d.to_f64()),
                        Item::Double(d) => out.double = Some(d),
                        _ => {}
                    }
                    key_state = 0;
                }
                _ => {}
            }
        }

        reader.discard_item(&item)?;
    }

    Ok(out)
}
