//! Binary wire format for PostgreSQL `NUMERIC`.
//!
//! Layout: `ndigits: i16`, `weight: i16`, `sign: u16`, `dscale: u16`, then
//! `ndigits` base-10000 digits. Values travel as decimal text on our side.

use bytes::{Buf, BufMut, BytesMut};
use std::error::Error;

const SIGN_POS: u16 = 0x0000;
const SIGN_NEG: u16 = 0x4000;
const SIGN_NAN: u16 = 0xC000;
const SIGN_PINF: u16 = 0xD000;
const SIGN_NINF: u16 = 0xF000;

/// Digits allowed before the decimal point.
const MAX_INT_DIGITS: i64 = 131_072;
/// Digits allowed after the decimal point.
const MAX_SCALE: i64 = 0x3FFF;

type BoxError = Box<dyn Error + Sync + Send>;

/// Encode decimal text (`-12.50`, `1e3`, `NaN`, `Infinity`) as a NUMERIC value.
pub(crate) fn encode(text: &str, out: &mut BytesMut) -> Result<(), BoxError> {
    let text = text.trim();
    let special = match text.to_ascii_lowercase().as_str() {
        "nan" => Some(SIGN_NAN),
        "infinity" | "+infinity" | "inf" => Some(SIGN_PINF),
        "-infinity" | "-inf" => Some(SIGN_NINF),
        _ => None,
    };
    if let Some(sign) = special {
        write_header(out, 0, 0, sign, 0);
        return Ok(());
    }

    let (negative, unsigned) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(pos) => {
            let exp: i32 = unsigned[pos + 1..]
                .parse()
                .map_err(|_| format!("invalid numeric exponent in '{text}'"))?;
            (&unsigned[..pos], exp)
        }
        None => (unsigned, 0),
    };

    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };
    if (int_part.is_empty() && frac_part.is_empty())
        || !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit())
    {
        return Err(format!("invalid numeric value '{text}'").into());
    }

    // Bound the shifted point before materialising any padding digits.
    let int_part = int_part.trim_start_matches('0');
    let point = int_part.len() as i64 + i64::from(exponent);
    let dscale = (int_part.len() + frac_part.len()) as i64 - point;
    if point > MAX_INT_DIGITS {
        return Err(format!("numeric value out of range in '{text}'").into());
    }
    if dscale > MAX_SCALE {
        return Err(format!("numeric scale too large in '{text}'").into());
    }
    let dscale = dscale.max(0) as usize;

    // Move the decimal point by the exponent.
    let mut digits: Vec<u8> = int_part.bytes().chain(frac_part.bytes()).map(|b| b - b'0').collect();
    if point < 0 {
        digits.splice(0..0, std::iter::repeat(0).take(point.unsigned_abs() as usize));
    }
    let point = point.max(0) as usize;
    if point > digits.len() {
        digits.resize(point, 0);
    }

    let (int_digits, frac_digits) = digits.split_at(point);
    let mut groups: Vec<i16> = Vec::new();

    let lead = (4 - int_digits.len() % 4) % 4;
    let padded_int: Vec<u8> =
        std::iter::repeat(0).take(lead).chain(int_digits.iter().copied()).collect();
    for chunk in padded_int.chunks(4) {
        groups.push(group_value(chunk));
    }
    let int_groups = groups.len() as i32;
    for chunk in frac_digits.chunks(4) {
        let mut padded = [0u8; 4];
        padded[..chunk.len()].copy_from_slice(chunk);
        groups.push(group_value(&padded));
    }

    let mut weight = int_groups - 1;
    let leading_zeros = groups.iter().take_while(|g| **g == 0).count();
    groups.drain(..leading_zeros);
    weight -= leading_zeros as i32;
    while groups.last() == Some(&0) {
        groups.pop();
    }

    if groups.is_empty() {
        write_header(out, 0, 0, SIGN_POS, dscale as u16);
        return Ok(());
    }

    let ndigits = i16::try_from(groups.len()).map_err(|_| "numeric value has too many digits")?;
    let weight = i16::try_from(weight).map_err(|_| "numeric value out of range")?;
    let sign = if negative { SIGN_NEG } else { SIGN_POS };
    write_header(out, ndigits, weight, sign, dscale as u16);
    for group in groups {
        out.put_i16(group);
    }
    Ok(())
}

/// Decode a NUMERIC value into decimal text, keeping its display scale.
pub(crate) fn decode(mut raw: &[u8]) -> Result<String, BoxError> {
    if raw.len() < 8 {
        return Err("numeric value too short".into());
    }
    let ndigits = raw.get_i16();
    let weight = raw.get_i16() as i32;
    let sign = raw.get_u16();
    let dscale = raw.get_u16() as usize;

    match sign {
        SIGN_NAN => return Ok("NaN".to_string()),
        SIGN_PINF => return Ok("Infinity".to_string()),
        SIGN_NINF => return Ok("-Infinity".to_string()),
        SIGN_POS | SIGN_NEG => {}
        other => return Err(format!("invalid numeric sign {other:#x}").into()),
    }
    if ndigits < 0 || raw.len() != ndigits as usize * 2 {
        return Err("numeric digit count does not match payload".into());
    }
    let groups: Vec<i16> = (0..ndigits).map(|_| raw.get_i16()).collect();
    let group_at = |index: i32| -> i16 {
        if index < 0 || index as usize >= groups.len() {
            0
        } else {
            groups[index as usize]
        }
    };

    let mut text = String::new();
    if sign == SIGN_NEG && !groups.is_empty() {
        text.push('-');
    }

    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&group_at(0).to_string());
        for index in 1..=weight {
            text.push_str(&format!("{:04}", group_at(index)));
        }
    }

    if dscale > 0 {
        let mut frac = String::new();
        let mut index = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", group_at(index)));
            index += 1;
        }
        frac.truncate(dscale);
        text.push('.');
        text.push_str(&frac);
    }

    Ok(text)
}

fn group_value(chunk: &[u8]) -> i16 {
    chunk.iter().fold(0i16, |acc, d| acc * 10 + *d as i16)
}

fn write_header(out: &mut BytesMut, ndigits: i16, weight: i16, sign: u16, dscale: u16) {
    out.put_i16(ndigits);
    out.put_i16(weight);
    out.put_u16(sign);
    out.put_u16(dscale);
}
