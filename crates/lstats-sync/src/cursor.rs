//! Watermark-bounded walk over one entity's match history.

use std::collections::VecDeque;

use lstats_adapters::{FeedError, MatchFeed, MatchRef, MAX_HISTORY_PAGE};
use lstats_core::TrackedEntity;

/// Lazily pages through history newest-first. Stops before the watermark or
/// when the feed runs out. `max_records` bounds only the first walk of an
/// entity without a watermark. Pages are requested only as the caller
/// consumes refs.
pub struct HistoryCursor<'a> {
    feed: &'a dyn MatchFeed,
    entity: &'a TrackedEntity,
    page_size: usize,
    max_records: usize,
    buffer: VecDeque<MatchRef>,
    next_start: usize,
    last_page: bool,
    done: bool,
    observed: usize,
    candidate: Option<MatchRef>,
}

impl<'a> HistoryCursor<'a> {
    pub fn new(feed: &'a dyn MatchFeed, entity: &'a TrackedEntity, page_size: usize, max_records: usize) -> Self {
        Self {
            feed,
            entity,
            page_size: page_size.clamp(1, MAX_HISTORY_PAGE),
            max_records,
            buffer: VecDeque::new(),
            next_start: 0,
            last_page: false,
            done: false,
            observed: 0,
            candidate: None,
        }
    }

    fn watermark(&self) -> Option<&str> {
        self.entity.last_seen_match_identity.as_deref()
    }

    /// Refs still allowed before the walk stops, when capped at all.
    fn remaining(&self) -> Option<usize> {
        match self.watermark() {
            Some(_) => None,
            None => Some(self.max_records.saturating_sub(self.observed)),
        }
    }

    pub async fn next(&mut self) -> Result<Option<MatchRef>, FeedError> {
        if self.done {
            return Ok(None);
        }
        if self.remaining() == Some(0) {
            self.done = true;
            return Ok(None);
        }
        if self.buffer.is_empty() {
            if self.last_page {
                self.done = true;
                return Ok(None);
            }
            let count = self.remaining().map_or(self.page_size, |left| self.page_size.min(left));
            let page = self.feed.history_page(self.entity, self.next_start, count).await?;
            self.next_start += page.len();
            self.last_page = page.len() < count;
            self.buffer.extend(page);
        }

        let Some(next) = self.buffer.pop_front() else {
            self.done = true;
            return Ok(None);
        };
        if self.watermark() == Some(next.key.as_str()) {
            self.done = true;
            self.buffer.clear();
            return Ok(None);
        }
        if self.candidate.is_none() {
            self.candidate = Some(next.clone());
        }
        self.observed += 1;
        Ok(Some(next))
    }

    /// Newest ref seen, whether or not it ended up stored.
    pub fn candidate_watermark(&self) -> Option<&MatchRef> {
        self.candidate.as_ref()
    }

    pub fn observed(&self) -> usize {
        self.observed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lstats_adapters::{FeedFixture, FixtureMatchFeed};
    use lstats_core::Platform;

    fn feed(keys: &[&str]) -> FixtureMatchFeed {
        FixtureMatchFeed::new(FeedFixture {
            histories: [("p".to_string(), keys.iter().map(|k| k.to_string()).collect())].into(),
            ..Default::default()
        })
    }

    fn entity(watermark: Option<&str>) -> TrackedEntity {
        TrackedEntity {
            id: 1,
            account_id: "p".into(),
            platform: Platform::Na1,
            profile: serde_json::Value::Null,
            last_seen_match_identity: watermark.map(str::to_string),
        }
    }

    async fn drain(cursor: &mut HistoryCursor<'_>) -> Vec<String> {
        let mut keys = Vec::new();
        while let Some(r) = cursor.next().await.unwrap() {
            keys.push(r.key);
        }
        keys
    }

    #[tokio::test]
    async fn stops_before_the_watermark() {
        let feed = feed(&["NA1_700", "NA1_600", "NA1_500", "NA1_400"]);
        let entity = entity(Some("NA1_500"));
        let mut cursor = HistoryCursor::new(&feed, &entity, 20, 100);
        assert_eq!(drain(&mut cursor).await, vec!["NA1_700", "NA1_600"]);
        assert_eq!(cursor.candidate_watermark().map(|r| r.key.as_str()), Some("NA1_700"));
        assert_eq!(cursor.observed(), 2);
    }

    #[tokio::test]
    async fn nothing_new_leaves_no_candidate() {
        let feed = feed(&["NA1_500", "NA1_400"]);
        let entity = entity(Some("NA1_500"));
        let mut cursor = HistoryCursor::new(&feed, &entity, 20, 100);
        assert!(drain(&mut cursor).await.is_empty());
        assert!(cursor.candidate_watermark().is_none());
    }

    #[tokio::test]
    async fn absent_watermark_is_bounded_by_the_history_limit() {
        let keys: Vec<String> = (1..=50).rev().map(|n| format!("NA1_{n}")).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let feed = feed(&refs);
        let entity = entity(None);
        let mut cursor = HistoryCursor::new(&feed, &entity, 10, 25);
        let seen = drain(&mut cursor).await;
        assert_eq!(seen.len(), 25);
        assert_eq!(seen[0], "NA1_50");
        assert_eq!(feed.history_calls(), 3);
    }

    #[tokio::test]
    async fn pages_are_fetched_lazily() {
        let feed = feed(&["NA1_9", "NA1_8", "NA1_7", "NA1_6", "NA1_5"]);
        let entity = entity(Some("NA1_8"));
        let mut cursor = HistoryCursor::new(&feed, &entity, 2, 100);
        assert_eq!(drain(&mut cursor).await, vec!["NA1_9"]);
        assert_eq!(feed.history_calls(), 1);
    }

    #[tokio::test]
    async fn watermark_walk_is_not_cut_by_the_history_limit() {
        let keys: Vec<String> = (1..=151).rev().map(|n| format!("NA1_{n}")).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let feed = feed(&refs);
        let entity = entity(Some("NA1_1"));
        let mut cursor = HistoryCursor::new(&feed, &entity, 20, 100);
        let seen = drain(&mut cursor).await;
        assert_eq!(seen.len(), 150);
        assert_eq!(seen.last().map(String::as_str), Some("NA1_2"));
        assert_eq!(cursor.candidate_watermark().map(|r| r.key.as_str()), Some("NA1_151"));
    }

    #[tokio::test]
    async fn oversized_pages_are_clamped_to_the_feed_maximum() {
        let keys: Vec<String> = (1..=250).rev().map(|n| format!("NA1_{n}")).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let feed = feed(&refs);
        let entity = entity(None);
        let mut cursor = HistoryCursor::new(&feed, &entity, 200, 500);
        assert_eq!(drain(&mut cursor).await.len(), 250);
        assert_eq!(feed.history_calls(), 3);
    }

    #[tokio::test]
    async fn short_page_ends_the_walk() {
        let feed = feed(&["NA1_3", "NA1_2", "NA1_1"]);
        let entity = entity(None);
        let mut cursor = HistoryCursor::new(&feed, &entity, 2, 100);
        assert_eq!(drain(&mut cursor).await.len(), 3);
        assert_eq!(feed.history_calls(), 2);
    }
}
