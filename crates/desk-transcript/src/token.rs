use desk_types::TRANSCRIPT_ID_LEN;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;

/// Draws a public transcript token from the operating system's CSPRNG.
pub fn generate_transcript_id() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(TRANSCRIPT_ID_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::generate_transcript_id;
    use desk_types::is_valid_transcript_id;
    use std::collections::HashSet;

    #[test]
    fn tokens_are_ten_alphanumerics_and_do_not_repeat() {
        let tokens = (0..256).map(|_| generate_transcript_id()).collect::<Vec<_>>();
        assert!(tokens.iter().all(|token| is_valid_transcript_id(token)));
        let unique = tokens.iter().collect::<HashSet<_>>();
        assert_eq!(unique.len(), tokens.len());
    }
}
