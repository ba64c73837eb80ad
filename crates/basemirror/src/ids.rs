use rand::distributions::Alphanumeric;
use rand::Rng;

/// Generate an id such as `recA1b2C3d4E5f6G7`.
pub fn generate_id(prefix: &str, length: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    format!("{prefix}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_shape() {
        let id = generate_id("rec", 14);
        assert!(id.starts_with("rec"));
        assert_eq!(id.len(), 17);
        assert!(id[3..].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generate_id_is_random() {
        assert_ne!(generate_id("rec", 14), generate_id("rec", 14));
    }
}
