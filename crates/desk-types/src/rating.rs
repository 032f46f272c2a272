use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ticket::TicketId;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RatingError {
    #[error("rating '{0}' is not a number")]
    NotANumber(String),
    #[error("rating {0} is outside {MIN_RATING}-{MAX_RATING}")]
    OutOfRange(i64),
}

/// Post-closure review, at most one per ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub ticket_id: TicketId,
    pub rating: u8,
    pub review: String,
}

/// Validates free-text rating input before anything touches the store.
pub fn parse_rating(raw: &str) -> Result<u8, RatingError> {
    let trimmed = raw.trim();
    let value = trimmed
        .parse::<i64>()
        .map_err(|_| RatingError::NotANumber(trimmed.to_string()))?;
    if !(i64::from(MIN_RATING)..=i64::from(MAX_RATING)).contains(&value) {
        return Err(RatingError::OutOfRange(value));
    }
    Ok(value as u8)
}

#[cfg(test)]
mod tests {
    use super::{parse_rating, RatingError};

    #[test]
    fn accepts_ratings_in_range() {
        assert_eq!(parse_rating("1"), Ok(1));
        assert_eq!(parse_rating(" 5 "), Ok(5));
    }

    #[test]
    fn rejects_non_numeric_and_out_of_range_ratings() {
        assert_eq!(
            parse_rating("great"),
            Err(RatingError::NotANumber("great".to_string()))
        );
        assert_eq!(parse_rating(""), Err(RatingError::NotANumber(String::new())));
        assert_eq!(parse_rating("0"), Err(RatingError::OutOfRange(0)));
        assert_eq!(parse_rating("9"), Err(RatingError::OutOfRange(9)));
    }
}
