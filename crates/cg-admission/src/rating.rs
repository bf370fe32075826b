//! Course likes and dislikes
//!
//! `/rating` maps a course code to the votes cast for it, one per identity:
//! `true` for a like, `false` for a dislike. A later vote replaces the
//! earlier one.

use std::collections::{BTreeMap, HashMap};

use cg_store::Documents;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::courses::{CourseRecord, COURSES_PATH};
use crate::{run_detached, AdmissionError, Result};

pub const RATING_PATH: &str = "/rating";

type Votes = BTreeMap<String, bool>;
type RatingIndex = HashMap<String, Votes>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Like,
    Dislike,
}

impl Vote {
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "like" => Some(Vote::Like),
            "dislike" => Some(Vote::Dislike),
            _ => None,
        }
    }

    fn as_bool(self) -> bool {
        matches!(self, Vote::Like)
    }
}

/// Aggregated votes of one course
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRating {
    pub likes: usize,
    pub dislikes: usize,
    pub ratings: usize,
    /// `ratings + likes - dislikes`, the default sort key
    pub rate_smart: i64,
    /// Share of likes, `0.0` without votes
    pub rate_dumb: f64,
}

impl CourseRating {
    pub fn from_votes(votes: &Votes) -> Self {
        let ratings = votes.len();
        let likes = votes.values().filter(|liked| **liked).count();
        let dislikes = ratings - likes;
        let rate_dumb = if ratings == 0 {
            0.0
        } else {
            likes as f64 / ratings as f64
        };
        Self {
            likes,
            dislikes,
            ratings,
            rate_smart: (ratings + likes) as i64 - dislikes as i64,
            rate_dumb,
        }
    }
}

#[derive(Clone)]
pub struct RatingRegistry {
    documents: Documents,
}

impl RatingRegistry {
    pub fn new(documents: Documents) -> Self {
        Self { documents }
    }

    pub async fn like(&self, code: &str, identity: &str) -> Result<CourseRating> {
        self.vote(code, identity, Vote::Like).await
    }

    pub async fn dislike(&self, code: &str, identity: &str) -> Result<CourseRating> {
        self.vote(code, identity, Vote::Dislike).await
    }

    /// Record `vote` for `identity`, replacing any earlier vote, and return
    /// the updated totals. Only indexed courses can be rated.
    pub async fn vote(&self, code: &str, identity: &str, vote: Vote) -> Result<CourseRating> {
        let this = self.clone();
        let code = code.to_uppercase();
        let identity = identity.to_string();
        run_detached(async move {
            let courses: HashMap<String, CourseRecord> =
                this.documents.load(COURSES_PATH).await?;
            if !courses.contains_key(&code) {
                return Err(AdmissionError::CourseNotFound(code));
            }

            let _guard = this.documents.lock(RATING_PATH).await;
            let mut index: RatingIndex = this.documents.load(RATING_PATH).await?;
            let votes = index.entry(code.clone()).or_default();
            let previous = votes.insert(identity.clone(), vote.as_bool());
            let rating = CourseRating::from_votes(votes);

            if previous == Some(vote.as_bool()) {
                debug!(code = %code, identity = %identity, "Vote unchanged");
                return Ok(rating);
            }
            this.documents.save(RATING_PATH, &index).await?;
            debug!(code = %code, identity = %identity, ?vote, "Vote recorded");
            Ok(rating)
        })
        .await
    }

    pub async fn rating(&self, code: &str) -> Result<CourseRating> {
        let index: RatingIndex = self.documents.load(RATING_PATH).await?;
        Ok(index
            .get(&code.to_uppercase())
            .map(CourseRating::from_votes)
            .unwrap_or_else(|| CourseRating::from_votes(&Votes::new())))
    }

    /// Drop every vote of a course. Returns whether any existed.
    pub async fn clear(&self, code: &str) -> Result<bool> {
        let this = self.clone();
        let code = code.to_uppercase();
        run_detached(async move {
            let _guard = this.documents.lock(RATING_PATH).await;
            let mut index: RatingIndex = this.documents.load(RATING_PATH).await?;
            if index.remove(&code).is_none() {
                return Ok(false);
            }
            this.documents.save(RATING_PATH, &index).await?;
            info!(code = %code, "Cleared course votes");
            Ok(true)
        })
        .await
    }
}
