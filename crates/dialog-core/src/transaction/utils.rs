//! Identifier generation for transactions and dialogs

use rand::Rng;
use uuid::Uuid;

/// New RFC 3261 branch parameter
pub fn generate_branch() -> String {
    format!("z9hG4bK-{}", Uuid::new_v4().simple())
}

/// New From/To tag
pub fn generate_tag() -> String {
    let mut rng = rand::thread_rng();
    format!("{:08x}{:08x}", rng.r#gen::<u32>(), rng.r#gen::<u32>())
}

/// Random Retry-After value in seconds, 0..=10
pub fn retry_after_secs() -> u32 {
    rand::thread_rng().gen_range(0..=10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_has_cookie() {
        let branch = generate_branch();
        assert!(branch.starts_with("z9hG4bK"));
        assert_ne!(branch, generate_branch());
    }

    #[test]
    fn test_tag_format() {
        let tag = generate_tag();
        assert_eq!(tag.len(), 16);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
