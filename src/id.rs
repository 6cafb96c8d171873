//! Identifier minting.

use chrono::Utc;
use uuid::Uuid;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Mints `<prefix>_<epoch-millis>_<9 base36 chars>`, e.g. `img_1718000000000_k3j9x0a2b`.
pub(crate) fn mint_id(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let mut entropy = u128::from_le_bytes(*Uuid::new_v4().as_bytes());
    let mut suffix = String::with_capacity(9);
    for _ in 0..9 {
        suffix.push(BASE36[(entropy % 36) as usize] as char);
        entropy /= 36;
    }
    format!("{prefix}_{millis}_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_id_shape() {
        let id = mint_id("img");
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "img");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_ids_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| mint_id("preset")).collect();
        assert_eq!(ids.len(), 1000);
    }
}
