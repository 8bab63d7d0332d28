//! Random multipart boundary tokens.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Random characters per boundary.
const TOKEN_LENGTH: usize = 32;

/// Generate a boundary for nesting `level` (1 = outermost).
///
/// The level prefix keeps nested boundaries distinct even before the random
/// part is compared; the random part makes a collision with body content
/// practically impossible. Callers still check and regenerate on collision.
pub fn generate(level: usize) -> String {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect();
    format!("b{level}_{token}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_shape() {
        let b = generate(2);
        assert!(b.starts_with("b2_"));
        assert_eq!(b.len(), 3 + TOKEN_LENGTH);
        assert!(b.bytes().all(|c| c.is_ascii_alphanumeric() || c == b'_'));
    }

    #[test]
    fn test_boundaries_differ() {
        assert_ne!(generate(1), generate(1));
    }
}
