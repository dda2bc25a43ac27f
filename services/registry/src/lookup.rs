//! Point lookups: which operator and region own a subscriber number.

use crate::error::LookupError;
use crate::model::{PhoneInfo, PREFIX_MULTIPLIER};
use sqlx::PgExecutor;

const COUNTRY_CODE: u8 = b'7';
const CLASS_DIGITS: &[u8] = b"3489";

/// Decode `7` + class digit + 9 digits into the absolute number used by ranges.
pub fn decode_subscriber_number(raw: &str) -> Result<i64, LookupError> {
    let bytes = raw.as_bytes();
    if bytes.len() != 11 {
        return Err(LookupError::InvalidNumber(format!(
            "expected 11 digits, got {} characters",
            raw.chars().count()
        )));
    }
    if !bytes.iter().all(u8::is_ascii_digit) {
        return Err(LookupError::InvalidNumber("only digits are allowed".to_string()));
    }
    if bytes[0] != COUNTRY_CODE {
        return Err(LookupError::InvalidNumber("country code must be 7".to_string()));
    }
    if !CLASS_DIGITS.contains(&bytes[1]) {
        return Err(LookupError::InvalidNumber(format!(
            "number class {} is not served",
            bytes[1] as char
        )));
    }

    // All ASCII digits, so the slices are valid and fit in i64.
    let prefix: i64 = raw[1..4].parse().map_err(|_| LookupError::InvalidNumber(raw.to_string()))?;
    let remainder: i64 = raw[4..].parse().map_err(|_| LookupError::InvalidNumber(raw.to_string()))?;
    Ok(prefix * PREFIX_MULTIPLIER + remainder)
}

/// Containment lookup of an absolute number. `None` means not registered.
pub async fn find_owner<'e, E>(executor: E, number: i64) -> Result<Option<PhoneInfo>, LookupError>
where
    E: PgExecutor<'e>,
{
    let info: Option<PhoneInfo> = sqlx::query_as(
        r#"
        SELECT o.inn, o.name AS operator, r.name AS region, r.sub_name AS sub_region
        FROM phone_range p
        JOIN operator o ON o.id = p.operator_id
        JOIN region r ON r.id = p.region_id
        WHERE p.span @> $1::int8
        LIMIT 1
        "#,
    )
    .bind(number)
    .fetch_optional(executor)
    .await?;
    Ok(info)
}

/// Validate a subscriber number and look it up. Invalid input never reaches the store.
pub async fn lookup_subscriber<'e, E>(executor: E, raw: &str) -> Result<Option<PhoneInfo>, LookupError>
where
    E: PgExecutor<'e>,
{
    let number = decode_subscriber_number(raw)?;
    find_owner(executor, number).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid_numbers() {
        assert_eq!(decode_subscriber_number("73838578850").unwrap(), 3838578850);
        assert_eq!(decode_subscriber_number("74963477626").unwrap(), 4963477626);
        assert_eq!(decode_subscriber_number("78000000000").unwrap(), 8000000000);
        assert_eq!(decode_subscriber_number("79999999999").unwrap(), 9999999999);
    }

    #[test]
    fn test_decode_rejects_non_digits() {
        assert!(matches!(
            decode_subscriber_number("797035a0007"),
            Err(LookupError::InvalidNumber(_))
        ));
        assert!(decode_subscriber_number("7903 123456").is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        assert!(decode_subscriber_number("7383857885").is_err());
        assert!(decode_subscriber_number("738385788500").is_err());
        assert!(decode_subscriber_number("").is_err());
        // 11 characters but not 11 bytes
        assert!(decode_subscriber_number("7383857885٣").is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_class_or_country() {
        assert!(decode_subscriber_number("75000000000").is_err());
        assert!(decode_subscriber_number("71234567890").is_err());
        assert!(decode_subscriber_number("83838578850").is_err());
    }
}
