use crate::store::MAX_PAGE_SIZE;

/// Tunables for channel resolution, paging and input validation.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Rows per history page. See [`SyncConfig::page_limit`].
    pub page_size: u32,
    /// Slug that is created on first access instead of failing with not-found.
    pub default_channel_slug: String,
    /// Longest accepted message body, in characters.
    pub max_body_chars: usize,
    /// Longest accepted reaction emoji, in bytes.
    pub max_emoji_bytes: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            default_channel_slug: "general".to_string(),
            max_body_chars: 4000,
            max_emoji_bytes: 32,
        }
    }
}

impl SyncConfig {
    /// The page size a store will actually honour.
    pub fn page_limit(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_limit_stays_within_store_bounds() {
        let config = |page_size| SyncConfig {
            page_size,
            ..SyncConfig::default()
        };
        assert_eq!(config(0).page_limit(), 1);
        assert_eq!(config(50).page_limit(), 50);
        assert_eq!(config(250).page_limit(), MAX_PAGE_SIZE);
    }
}
