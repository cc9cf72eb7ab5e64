// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Parsing of vendor option contract identifiers.
//!
//! The wire format is `O:<TICKER><YYMMDD|YYYMMDD><C|P><STRIKE8>` where the
//! strike carries three implied decimals (`00155000` = $155.000). The ticker
//! is variable length and runs up to the first date digit; a seven digit
//! date keeps its trailing six digits as `YYMMDD`. This runs on every trade,
//! so it scans bytes and allocates only for the underlying.

use chrono::NaiveDate;
use thiserror::Error;

use crate::types::{OptionContract, OptionSide};

const STRIKE_DIGITS: usize = 8;
const DATE_DIGITS_MIN: usize = 6;
const DATE_DIGITS_MAX: usize = 7;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("malformed option symbol: {0}")]
    MalformedSymbol(String),
}

/// Parse a vendor contract identifier into its components.
pub fn parse_contract(symbol: &str) -> Result<OptionContract, ContractError> {
    let malformed = || ContractError::MalformedSymbol(symbol.to_string());
    let body = symbol.strip_prefix("O:").ok_or_else(malformed)?;
    let bytes = body.as_bytes();
    // ticker (>=1) + date (>=6) + side (1) + strike (8)
    if bytes.len() < 1 + DATE_DIGITS_MIN + 1 + STRIKE_DIGITS {
        return Err(malformed());
    }

    let strike_start = bytes.len() - STRIKE_DIGITS;
    let strike_raw = parse_digits(&bytes[strike_start..]).ok_or_else(malformed)?;
    if strike_raw == 0 {
        return Err(malformed());
    }
    let strike = strike_raw as f64 / 1000.0;

    let side = match bytes[strike_start - 1] {
        b'C' => OptionSide::Call,
        b'P' => OptionSide::Put,
        _ => return Err(malformed()),
    };

    let head = &bytes[..strike_start - 1];
    let date_len = head
        .iter()
        .rev()
        .take_while(|b| b.is_ascii_digit())
        .count()
        .min(DATE_DIGITS_MAX);
    if date_len < DATE_DIGITS_MIN {
        return Err(malformed());
    }
    let ticker_len = head.len() - date_len;
    if ticker_len == 0 {
        return Err(malformed());
    }
    // A seven digit date keeps the trailing YYMMDD.
    let ymd = &head[head.len() - DATE_DIGITS_MIN..];
    let year = 2000 + two_digits(&ymd[0..2]) as i32;
    let month = two_digits(&ymd[2..4]);
    let day = two_digits(&ymd[4..6]);
    let expiry = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(malformed)?;

    let underlying = std::str::from_utf8(&head[..ticker_len])
        .ok()
        .filter(|t| t.bytes().all(|b| b.is_ascii_alphabetic()))
        .ok_or_else(malformed)?
        .to_string();

    Ok(OptionContract {
        underlying,
        expiry,
        side,
        strike,
    })
}

/// Encode a contract back into the vendor identifier. Inverse of
/// [`parse_contract`] for strikes that are a multiple of $0.001.
pub fn format_contract(contract: &OptionContract) -> String {
    use chrono::Datelike;
    let side = match contract.side {
        OptionSide::Call => 'C',
        OptionSide::Put => 'P',
    };
    format!(
        "O:{}{:02}{:02}{:02}{}{:08}",
        contract.underlying,
        contract.expiry.year() % 100,
        contract.expiry.month(),
        contract.expiry.day(),
        side,
        (contract.strike * 1000.0).round() as u64,
    )
}

fn parse_digits(bytes: &[u8]) -> Option<u64> {
    let mut value = 0u64;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value * 10 + (b - b'0') as u64;
    }
    Some(value)
}

fn two_digits(bytes: &[u8]) -> u32 {
    ((bytes[0] - b'0') * 10 + (bytes[1] - b'0')) as u32
}
