//! Content cache: normalized URL (plus format) to archive reference

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DbPool;
use crate::archive::ArchiveReference;
use crate::format::Format;
use crate::platform::{Platform, normalize_url};
use crate::{Error, Result};

/// One archived piece of content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// `normalize(url)` or `normalize(url)#format`
    pub key: String,
    /// Where the content is archived
    pub reference: ArchiveReference,
    /// Source platform
    pub platform: Platform,
    /// When the entry was written
    pub created_at: DateTime<Utc>,
}

/// Outcome of an insert-if-absent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The entry was written
    Inserted,
    /// An entry already existed and was kept
    AlreadyExists(ArchiveReference),
}

/// Entry counts for `stats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Total entries
    pub total: u64,
    /// Entries per platform, ordered by platform name
    pub per_platform: Vec<(String, u64)>,
}

/// Build the cache key for a URL and optional format
///
/// # Errors
///
/// Returns `Error::InvalidUrl` if the URL cannot be normalized
pub fn cache_key(url: &str, format: Option<&Format>) -> Result<String> {
    let normalized = normalize_url(url)?;
    Ok(match format {
        Some(format) => format!("{normalized}#{format}"),
        None => normalized,
    })
}

/// Repository for the content cache
///
/// Entries are immutable: the first writer wins and nothing is evicted.
#[derive(Debug, Clone)]
pub struct CacheRepo {
    pool: DbPool,
}

impl CacheRepo {
    /// Create a new repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Look up archived content
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the database operation fails
    pub fn get(&self, url: &str, format: Option<&Format>) -> Result<Option<ArchiveReference>> {
        let key = cache_key(url, format)?;
        Ok(self.get_entry(&key)?.map(|entry| entry.reference))
    }

    /// Look up a full entry by key
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let result = conn.query_row(
            "SELECT cache_key, archive_location_id, message_id, platform, created_at
             FROM media_cache WHERE cache_key = ?1",
            [key],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        );

        match result {
            Ok((key, archive_location_id, message_id, platform, created_at)) => {
                Ok(Some(CacheEntry {
                    key,
                    reference: ArchiveReference {
                        archive_location_id,
                        message_id,
                    },
                    platform: platform.parse()?,
                    created_at: parse_timestamp(&created_at),
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Record archived content unless the key is already present
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the database operation fails
    pub fn put(
        &self,
        url: &str,
        format: Option<&Format>,
        reference: ArchiveReference,
        platform: Platform,
    ) -> Result<PutOutcome> {
        let key = cache_key(url, format)?;
        let normalized = normalize_url(url)?;
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let inserted = conn.execute(
            "INSERT INTO media_cache (cache_key, url, format, platform, archive_location_id, message_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(cache_key) DO NOTHING",
            rusqlite::params![
                key,
                normalized,
                format.map(ToString::to_string),
                platform.as_str(),
                reference.archive_location_id,
                reference.message_id,
            ],
        )?;
        drop(conn);

        if inserted > 0 {
            tracing::debug!(key = %key, %reference, "cache entry written");
            return Ok(PutOutcome::Inserted);
        }

        let existing = self
            .get_entry(&key)?
            .ok_or_else(|| Error::Database(format!("cache entry {key} vanished")))?;
        tracing::debug!(key = %key, existing = %existing.reference, "cache entry already present");
        Ok(PutOutcome::AlreadyExists(existing.reference))
    }

    /// Entry counts, total and per platform
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn stats(&self) -> Result<CacheStats> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT platform, COUNT(*) FROM media_cache GROUP BY platform ORDER BY platform",
        )?;
        let per_platform: Vec<(String, u64)> = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .flatten()
            .map(|(platform, count)| (platform, u64::try_from(count).unwrap_or_default()))
            .collect();

        let total = per_platform.iter().map(|(_, count)| count).sum();
        Ok(CacheStats {
            total,
            per_platform,
        })
    }
}

/// `SQLite` `datetime('now')` produces UTC without an offset
fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn reference(message_id: i64) -> ArchiveReference {
        ArchiveReference {
            archive_location_id: -1_001_234,
            message_id,
        }
    }

    #[test]
    fn keys_include_format() {
        assert_eq!(
            cache_key("https://www.youtube.com/watch?v=abc", Some(&Format::Resolution(720))).unwrap(),
            "https://youtube.com/watch?v=abc#720p"
        );
        assert_eq!(
            cache_key("https://vm.tiktok.com/ABC/", None).unwrap(),
            "https://vm.tiktok.com/ABC"
        );
    }

    #[test]
    fn put_then_get() {
        let repo = CacheRepo::new(db::init_memory().unwrap());
        let url = "https://www.instagram.com/reel/XYZ/";

        assert_eq!(repo.get(url, None).unwrap(), None);
        assert_eq!(
            repo.put(url, None, reference(10), Platform::Instagram).unwrap(),
            PutOutcome::Inserted
        );

        // Equivalent spelling of the same URL hits the same entry
        assert_eq!(
            repo.get("https://instagram.com/reel/XYZ?igshid=abc", None).unwrap(),
            Some(reference(10))
        );
    }

    #[test]
    fn first_writer_wins() {
        let repo = CacheRepo::new(db::init_memory().unwrap());
        let url = "https://x.com/user/status/1";

        repo.put(url, None, reference(1), Platform::Twitter).unwrap();
        assert_eq!(
            repo.put(url, None, reference(2), Platform::Twitter).unwrap(),
            PutOutcome::AlreadyExists(reference(1))
        );
        assert_eq!(repo.get(url, None).unwrap(), Some(reference(1)));
    }

    #[test]
    fn formats_are_separate_entries() {
        let repo = CacheRepo::new(db::init_memory().unwrap());
        let url = "https://youtu.be/abc";

        repo.put(url, Some(&Format::Resolution(360)), reference(1), Platform::YouTube)
            .unwrap();
        assert_eq!(repo.get(url, Some(&Format::Audio)).unwrap(), None);
        assert_eq!(
            repo.get(url, Some(&Format::Resolution(360))).unwrap(),
            Some(reference(1))
        );

        let entry = repo
            .get_entry(&cache_key(url, Some(&Format::Resolution(360))).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(entry.platform, Platform::YouTube);
    }

    #[test]
    fn stats_count_per_platform() {
        let repo = CacheRepo::new(db::init_memory().unwrap());
        repo.put("https://instagram.com/p/1", None, reference(1), Platform::Instagram)
            .unwrap();
        repo.put("https://instagram.com/p/2", None, reference(2), Platform::Instagram)
            .unwrap();
        repo.put("https://tiktok.com/@a/video/3", None, reference(3), Platform::TikTok)
            .unwrap();

        let stats = repo.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(
            stats.per_platform,
            vec![("instagram".to_string(), 2), ("tiktok".to_string(), 1)]
        );
    }
}
