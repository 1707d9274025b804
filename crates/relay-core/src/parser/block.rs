use crate::error::ParseError;

// ==============================================================================
// Sentinel Block Values
// ==============================================================================
//
// Symbolic block tags share the numeric height space with real heights.
// Real heights are never negative, so the tags live below zero.

pub const NOT_APPLICABLE: i64 = -1;
pub const LATEST_BLOCK: i64 = -2;
pub const EARLIEST_BLOCK: i64 = -3;
pub const PENDING_BLOCK: i64 = -4;
pub const SAFE_BLOCK: i64 = -5;
pub const FINALIZED_BLOCK: i64 = -6;

/// Map a block tag or number to a canonical height.
///
/// Tags map to sentinels; anything else must be a non-negative integer in
/// decimal or with a `0x`, `0o`, `0b` or leading-`0` (octal) base prefix.
pub fn parse_default_block_parameter(block: &str) -> Result<i64, ParseError> {
    match block {
        "latest" => return Ok(LATEST_BLOCK),
        "earliest" => return Ok(EARLIEST_BLOCK),
        "pending" => return Ok(PENDING_BLOCK),
        "safe" => return Ok(SAFE_BLOCK),
        "finalized" => return Ok(FINALIZED_BLOCK),
        _ => {}
    }

    let number = parse_prefixed_int(block).ok_or_else(|| {
        ParseError::InvalidBlock(format!("could not parse block {block:?}"))
    })?;
    if number < 0 {
        return Err(ParseError::InvalidBlock(format!(
            "block value was negative: {number}"
        )));
    }
    Ok(number)
}

fn parse_prefixed_int(text: &str) -> Option<i64> {
    let (negative, unsigned) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };

    let (radix, digits) = if let Some(rest) = strip_prefix_ci(unsigned, "0x") {
        (16, rest)
    } else if let Some(rest) = strip_prefix_ci(unsigned, "0o") {
        (8, rest)
    } else if let Some(rest) = strip_prefix_ci(unsigned, "0b") {
        (2, rest)
    } else if unsigned.len() > 1 && unsigned.starts_with('0') {
        (8, &unsigned[1..])
    } else {
        (10, unsigned)
    };

    // `from_str_radix` accepts its own sign; the sign was consumed above.
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    let magnitude = i64::from_str_radix(digits, radix).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    if text.len() >= prefix.len() && text[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_map_to_sentinels() {
        assert_eq!(parse_default_block_parameter("latest"), Ok(LATEST_BLOCK));
        assert_eq!(parse_default_block_parameter("earliest"), Ok(EARLIEST_BLOCK));
        assert_eq!(parse_default_block_parameter("pending"), Ok(PENDING_BLOCK));
        assert_eq!(parse_default_block_parameter("safe"), Ok(SAFE_BLOCK));
        assert_eq!(parse_default_block_parameter("finalized"), Ok(FINALIZED_BLOCK));
    }

    #[test]
    fn numbers_accept_common_base_prefixes() {
        assert_eq!(parse_default_block_parameter("123"), Ok(123));
        assert_eq!(parse_default_block_parameter("0x7B"), Ok(123));
        assert_eq!(parse_default_block_parameter("0o173"), Ok(123));
        assert_eq!(parse_default_block_parameter("0b1111011"), Ok(123));
        assert_eq!(parse_default_block_parameter("0173"), Ok(123));
        assert_eq!(parse_default_block_parameter("0"), Ok(0));
    }

    #[test]
    fn negative_and_garbage_are_errors() {
        assert!(matches!(
            parse_default_block_parameter("-5"),
            Err(ParseError::InvalidBlock(_))
        ));
        assert!(matches!(
            parse_default_block_parameter("abc"),
            Err(ParseError::InvalidBlock(_))
        ));
        assert!(parse_default_block_parameter("").is_err());
        assert!(parse_default_block_parameter("0x").is_err());
        assert!(parse_default_block_parameter("--1").is_err());
    }
}
