//! Feed and board ordering: latest, popular, trending.

use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// z for a 95% confidence interval
const WILSON_Z: f64 = 1.96;

/// Lower bound of the Wilson score interval for a like ratio.
pub fn wilson_score(likes: u64, dislikes: u64) -> f64 {
    let n = (likes + dislikes) as f64;
    if n == 0.0 {
        return 0.0;
    }
    let z2 = WILSON_Z * WILSON_Z;
    let phat = likes as f64 / n;
    (phat + z2 / (2.0 * n) - WILSON_Z * ((phat * (1.0 - phat) + z2 / (4.0 * n)) / n).sqrt())
        / (1.0 + z2 / n)
}

/// Recency bonus with a steep first day, a slower first week, and a long tail.
pub fn time_weight(age_hours: f64) -> f64 {
    if age_hours < 24.0 {
        10.0 * (-age_hours / 24.0).exp()
    } else if age_hours < 168.0 {
        10.0 * (-age_hours / 168.0).exp()
    } else {
        (-age_hours / 720.0).exp()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    #[default]
    Latest,
    Popular,
    Trending,
}

impl FromStr for SortMode {
    type Err = std::convert::Infallible;

    /// Unknown modes fall back to [`SortMode::Latest`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "popular" => SortMode::Popular,
            "trending" => SortMode::Trending,
            _ => SortMode::Latest,
        })
    }
}

/// The fields of a post that ordering looks at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPost {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub likes_count: u64,
    #[serde(default)]
    pub dislikes_count: u64,
}

impl RankedPost {
    fn net_likes(&self) -> i64 {
        self.likes_count as i64 - self.dislikes_count as i64
    }

    pub fn trending_score(&self, now: DateTime<Utc>) -> f64 {
        let age_hours = (now - self.created_at).num_seconds() as f64 / 3600.0;
        let weight = time_weight(age_hours);
        if self.likes_count + self.dislikes_count == 0 {
            return weight;
        }
        wilson_score(self.likes_count, self.dislikes_count) * 100.0 + weight
    }
}

/// Sort in place.  Ties keep their input order.
pub fn sort_posts(posts: &mut [RankedPost], mode: SortMode, now: DateTime<Utc>) {
    match mode {
        SortMode::Latest => posts.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortMode::Popular => posts.sort_by_key(|p| std::cmp::Reverse(p.net_likes())),
        SortMode::Trending => posts.sort_by(|a, b| {
            b.trending_score(now)
                .partial_cmp(&a.trending_score(now))
                .unwrap_or(Ordering::Equal)
        }),
    }
}
