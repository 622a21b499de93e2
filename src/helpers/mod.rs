use std::str::FromStr;

use bigdecimal::BigDecimal;

pub use self::{
    enums::{BackfillMode, Category, Chain, ChainFamily, PegCurrency},
    time_window::{hour_bucket, TimeWindow},
};

mod enums;
mod time_window;

/// Splits `(a,b,c),(d,e,f)` into `["a,b,c", "d,e,f"]`.
pub fn parse_tuple_string(data: String) -> Vec<String> {
    let data = data.trim();
    if data.len() < 2 {
        return Vec::new();
    }

    let str = &data[1..];
    let splited = str.split(",(");
    let mut items: Vec<String> = Vec::new();

    for c in splited {
        if let Some(index) = c.find(')') {
            let tuple_data = &c[0..index];
            items.push(tuple_data.trim().to_owned());
        }
    }

    items
}

/// Parses a `0x`-prefixed big-endian quantity (uint256 log data, RPC
/// quantities) into an exact integer. `None` when the input is not hex.
pub fn parse_hex_quantity(value: &str) -> Option<BigDecimal> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() {
        return None;
    }

    let sixteen = BigDecimal::from(16);
    let mut acc = BigDecimal::from(0);

    for c in digits.chars() {
        let digit = c.to_digit(16)?;
        acc = acc * &sixteen + BigDecimal::from(digit);
    }

    Some(acc)
}

pub fn parse_hex_u64(value: &str) -> Option<u64> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(digits, 16).ok()
}

/// Converts a raw integer token amount into whole units.
pub fn scale_amount(raw: BigDecimal, decimals: u32) -> BigDecimal {
    let ten = BigDecimal::from(10);
    let mut divisor = BigDecimal::from(1);
    for _ in 0..decimals {
        divisor = divisor * &ten;
    }

    raw / divisor
}

pub fn parse_raw_amount(raw: &str, decimals: u32) -> Option<BigDecimal> {
    let value = BigDecimal::from_str(raw.trim()).ok()?;
    Some(scale_amount(value, decimals))
}

/// Rates and balances arrive as JSON floats; go through their shortest
/// decimal representation so 1.27 stays 1.27.
pub fn decimal_from_f64(value: f64) -> Option<BigDecimal> {
    if !value.is_finite() {
        return None;
    }
    BigDecimal::from_str(&value.to_string()).ok()
}
