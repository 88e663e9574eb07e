//! Per-user article ranking.
//!
//! Each candidate is scored against every preference by cosine similarity
//! times the preference weight, and the best single match wins (weighted
//! maximum, never an average).
//!
//! Feedback from the interaction log is applied afterwards: recently viewed
//! or clicked articles are multiplied by `seen_penalty`, recently dismissed
//! ones are dropped until their cooldown expires. Results are totally
//! ordered by adjusted score, unseen before seen, then published time,
//! then URL.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::config::RankingConfig;
use crate::db::{ArticleStore, InteractionLog, PreferenceStore};
use crate::embedding::{cosine_similarity, VectorCodec};
use crate::error::Result;
use crate::models::{Article, Interaction, Preference, Recommendation};

/// A preference ready for scoring.
#[derive(Debug, Clone)]
pub struct ScoringPreference {
    pub id: i64,
    pub weight: f32,
    pub vector: Vec<f32>,
}

/// What the user's recent interactions imply for ranking.
#[derive(Debug, Clone, Default)]
pub struct Feedback {
    pub dismissed: HashSet<String>,
    pub seen: HashSet<String>,
}

impl Feedback {
    /// The newest interaction of each kind decides: a dismissal inside the
    /// cooldown hides the article unless the user engaged with it after
    /// dismissing; an engagement inside the feedback window marks it seen.
    pub fn from_interactions(
        interactions: &[Interaction],
        now: DateTime<Utc>,
        feedback_window: Duration,
        dismiss_cooldown: Duration,
    ) -> Self {
        let mut latest: HashMap<&str, (Option<DateTime<Utc>>, Option<DateTime<Utc>>)> =
            HashMap::new();
        for interaction in interactions {
            let entry = latest.entry(interaction.article_url.as_str()).or_default();
            let slot = if interaction.action.is_engagement() {
                &mut entry.0
            } else {
                &mut entry.1
            };
            if slot.map_or(true, |t| interaction.occurred_at > t) {
                *slot = Some(interaction.occurred_at);
            }
        }

        let mut feedback = Feedback::default();
        for (url, (engaged, dismissed)) in latest {
            let dismissed_active = match dismissed {
                Some(d) => d >= now - dismiss_cooldown && engaged.map_or(true, |e| d >= e),
                None => false,
            };
            if dismissed_active {
                feedback.dismissed.insert(url.to_string());
            } else if engaged.is_some_and(|e| e >= now - feedback_window) {
                feedback.seen.insert(url.to_string());
            }
        }
        feedback
    }
}

#[derive(Debug, Clone)]
struct Scored {
    article: Article,
    similarity: f32,
    adjusted: f32,
    matched: i64,
    seen: bool,
}

/// Best weighted match: `(preference id, raw similarity, weighted score)`.
pub fn weighted_max(vector: &[f32], profile: &[ScoringPreference]) -> Option<(i64, f32, f32)> {
    let mut best: Option<(i64, f32, f32)> = None;
    for preference in profile {
        let similarity = cosine_similarity(vector, &preference.vector);
        let weighted = similarity * preference.weight;
        if best.map_or(true, |(_, _, score)| weighted > score) {
            best = Some((preference.id, similarity, weighted));
        }
    }
    best
}

/// Lowers a score whatever its sign.
fn apply_penalty(score: f32, penalty: f32) -> f32 {
    if score >= 0.0 {
        score * penalty
    } else {
        score / penalty
    }
}

fn newest_first(a: &Article, b: &Article) -> Ordering {
    b.published_at
        .cmp(&a.published_at)
        .then_with(|| a.url.cmp(&b.url))
}

/// Scores and orders candidates. Articles without an embedding are skipped.
pub fn rank(
    candidates: Vec<Article>,
    profile: &[ScoringPreference],
    feedback: &Feedback,
    seen_penalty: f32,
) -> Vec<Recommendation> {
    let mut scored: Vec<Scored> = candidates
        .into_iter()
        .filter(|article| !feedback.dismissed.contains(&article.url))
        .filter_map(|article| {
            let (matched, similarity, relevance) =
                weighted_max(article.embedding.as_deref()?, profile)?;
            let seen = feedback.seen.contains(&article.url);
            let adjusted = if seen {
                apply_penalty(relevance, seen_penalty)
            } else {
                relevance
            };
            Some(Scored {
                article,
                similarity,
                adjusted,
                matched,
                seen,
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.adjusted
            .total_cmp(&a.adjusted)
            .then_with(|| a.seen.cmp(&b.seen))
            .then_with(|| newest_first(&a.article, &b.article))
    });

    scored
        .into_iter()
        .map(|s| Recommendation {
            article: s.article,
            score: s.similarity,
            matched_preference: Some(s.matched),
            previously_seen: s.seen,
        })
        .collect()
}

pub struct RankingEngine {
    articles: Arc<dyn ArticleStore>,
    preferences: Arc<dyn PreferenceStore>,
    interactions: Arc<dyn InteractionLog>,
    codec: Arc<VectorCodec>,
    settings: RankingConfig,
}

impl RankingEngine {
    pub fn new(
        articles: Arc<dyn ArticleStore>,
        preferences: Arc<dyn PreferenceStore>,
        interactions: Arc<dyn InteractionLog>,
        codec: Arc<VectorCodec>,
        settings: RankingConfig,
    ) -> Self {
        Self {
            articles,
            preferences,
            interactions,
            codec,
            settings,
        }
    }

    /// Top `limit` articles for `user_id`. Falls back to newest-first when
    /// the user has no usable preference or nothing embedded to score.
    pub async fn recommend(&self, user_id: i64, limit: usize) -> Result<Vec<Recommendation>> {
        let limit = limit.clamp(1, self.settings.max_results);
        let now = Utc::now();

        let feedback = self.feedback(user_id, now).await?;
        let profile = self.profile(user_id).await?;
        if profile.is_empty() {
            tracing::debug!("User {} has no usable preferences, serving latest", user_id);
            return self.latest(limit, &feedback).await;
        }

        let since = now - self.settings.candidate_window();
        let candidates = self
            .articles
            .list_candidates(since, self.settings.candidate_limit)
            .await?;
        if candidates.is_empty() {
            return self.latest(limit, &feedback).await;
        }

        let mut ranked = rank(candidates, &profile, &feedback, self.settings.seen_penalty);
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// Unpersonalized newest-first listing, minus dismissed articles.
    pub async fn latest(&self, limit: usize, feedback: &Feedback) -> Result<Vec<Recommendation>> {
        let articles = self
            .articles
            .latest(limit + feedback.dismissed.len())
            .await?;

        Ok(articles
            .into_iter()
            .filter(|article| !feedback.dismissed.contains(&article.url))
            .take(limit)
            .map(|article| Recommendation {
                previously_seen: feedback.seen.contains(&article.url),
                article,
                score: 0.0,
                matched_preference: None,
            })
            .collect())
    }

    pub async fn feedback(&self, user_id: i64, now: DateTime<Utc>) -> Result<Feedback> {
        let feedback_window = self.settings.feedback_window();
        let dismiss_cooldown = self.settings.dismiss_cooldown();
        let since = now - feedback_window.max(dismiss_cooldown);
        let interactions = self.interactions.recent_for(user_id, since).await?;
        Ok(Feedback::from_interactions(
            &interactions,
            now,
            feedback_window,
            dismiss_cooldown,
        ))
    }

    /// Loads the user's preferences, embedding any that lack a vector.
    /// A preference that cannot be embedded sits out this round.
    pub async fn profile(&self, user_id: i64) -> Result<Vec<ScoringPreference>> {
        let preferences = self.preferences.list_preferences(user_id).await?;
        let mut profile = Vec::with_capacity(preferences.len());

        for preference in preferences {
            let Preference {
                id,
                weight,
                description,
                embedding,
                ..
            } = preference;

            let vector = match embedding {
                Some(vector) => vector,
                None => match self.codec.embed(&description).await {
                    Ok(vector) => {
                        let stored = self
                            .preferences
                            .set_preference_embedding(user_id, id, &description, vector.clone())
                            .await?;
                        if !stored {
                            tracing::debug!("Preference {} changed while embedding", id);
                        }
                        vector
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        tracing::warn!("Skipping preference {} for user {}: {}", id, user_id, e);
                        continue;
                    }
                },
            };

            profile.push(ScoringPreference { id, weight, vector });
        }

        Ok(profile)
    }
}
