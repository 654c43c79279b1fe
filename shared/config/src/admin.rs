use std::collections::HashSet;

/// Telegram ids allowed to run administrative operations, loaded once at start-up.
#[derive(Debug, Clone, Default)]
pub struct AdminPolicy {
    telegram_ids: HashSet<i64>,
}

impl AdminPolicy {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            telegram_ids: ids.into_iter().collect(),
        }
    }

    /// Parses a comma-separated list, skipping blanks
    pub fn parse(raw: &str) -> Result<Self, std::num::ParseIntError> {
        let ids = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<i64>)
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(Self { telegram_ids: ids })
    }

    pub fn is_admin(&self, telegram_id: i64) -> bool {
        self.telegram_ids.contains(&telegram_id)
    }

    pub fn len(&self) -> usize {
        self.telegram_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.telegram_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_allow_list() {
        let policy = AdminPolicy::parse(" 42, 7,,1001 ").unwrap();
        assert_eq!(policy.len(), 3);
        assert!(policy.is_admin(42));
        assert!(!policy.is_admin(8));
        assert!(AdminPolicy::parse("").unwrap().is_empty());
        assert!(AdminPolicy::parse("12,abc").is_err());
    }
}
