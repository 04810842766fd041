//! Shared types used across the Prospector workspace.
//!
//! This module defines the search task, lead and preference types that flow
//! between the planner, the source adapters, the lead pipeline and the
//! presentation layer.

use crate::error::ProspectorError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Metadata key holding the numeric lead score.
pub const METADATA_SCORE: &str = "score";

/// Metadata key holding the lead tier.
pub const METADATA_TIER: &str = "tier";

/// Business directory or search provider a task is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeadSource {
    /// Map listings
    Maps,
    /// Social network business pages
    Social,
    /// First general review directory
    ReviewSiteA,
    /// Second general review directory
    ReviewSiteB,
    /// Travel and hospitality reviews
    TravelReview,
    /// Trust and reputation reviews
    TrustReview,
}

impl LeadSource {
    /// Every source, in dispatch order.
    #[must_use]
    pub fn all() -> &'static [LeadSource] {
        &[
            Self::Maps,
            Self::Social,
            Self::ReviewSiteA,
            Self::ReviewSiteB,
            Self::TravelReview,
            Self::TrustReview,
        ]
    }

    /// Stable identifier used in logs and provenance tags.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Maps => "maps",
            Self::Social => "social",
            Self::ReviewSiteA => "review-site-a",
            Self::ReviewSiteB => "review-site-b",
            Self::TravelReview => "travel-review",
            Self::TrustReview => "trust-review",
        }
    }
}

impl fmt::Display for LeadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a search task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet executed
    #[default]
    Pending,
    /// Source returned (possibly empty) results
    Completed,
    /// Source failed, timed out or was skipped
    Failed,
}

/// One unit of work: search one source for one query in one city.
///
/// Only `status` changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchTask {
    /// Unique task identifier (UUID v4)
    pub id: String,
    /// Search terms, usually the niche or a variation of it
    pub query: String,
    /// City to search in
    pub location: String,
    /// Source adapter that executes this task
    pub source: LeadSource,
    /// Current status
    pub status: TaskStatus,
    /// Country the city was discovered from, if any
    pub discovered_from_country: Option<String>,
    /// Desired number of results for this task
    pub limit: Option<u32>,
}

impl SearchTask {
    /// Create a pending task.
    #[must_use]
    pub fn new(query: impl Into<String>, location: impl Into<String>, source: LeadSource) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            query: query.into(),
            location: location.into(),
            source,
            status: TaskStatus::Pending,
            discovered_from_country: None,
            limit: None,
        }
    }

    /// Record the country this task's city was discovered from.
    #[must_use]
    pub fn with_country(mut self, country: Option<String>) -> Self {
        self.discovered_from_country = country;
        self
    }

    /// Set the desired result count.
    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Whether a lead has been committed to run results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    /// Still moving through the pipeline
    #[default]
    Pending,
    /// Committed to run results
    Qualified,
}

/// Coarse lead quality bucket derived from the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Score below 3
    Bronze,
    /// Score 3 or 4
    Silver,
    /// Score 5 or more
    Gold,
}

impl Tier {
    /// Map a score to its tier.
    #[must_use]
    pub fn from_score(score: u8) -> Self {
        match score {
            s if s >= 5 => Self::Gold,
            s if s >= 3 => Self::Silver,
            _ => Self::Bronze,
        }
    }

    /// Lowercase name used in metadata.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gold => "gold",
            Self::Silver => "silver",
            Self::Bronze => "bronze",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discovered business.
///
/// Created by a source adapter, mutated by the lead pipeline, and never
/// touched again once committed to run results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    /// Unique lead identifier (UUID v4)
    pub id: String,
    /// Business name
    pub name: String,
    /// Business category as reported by the source
    pub category: Option<String>,
    /// Street address
    pub address: Option<String>,
    /// Phone number as reported by the source
    pub phone: Option<String>,
    /// Contact email
    pub email: Option<String>,
    /// Website URL
    pub website: Option<String>,
    /// Average rating (0-5)
    pub rating: Option<f32>,
    /// Number of reviews
    pub review_count: Option<u32>,
    /// Registered on the messaging service
    pub has_whatsapp: bool,
    /// Email confirmed deliverable
    pub email_verified: bool,
    /// Source that produced this lead
    pub source: LeadSource,
    /// Pipeline status
    pub status: LeadStatus,
    /// Open metadata; carries at least `score` and `tier` once scored
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Lead {
    /// Create a bare lead with only a name and its provenance.
    #[must_use]
    pub fn new(name: impl Into<String>, source: LeadSource) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            category: None,
            address: None,
            phone: None,
            email: None,
            website: None,
            rating: None,
            review_count: None,
            has_whatsapp: false,
            email_verified: false,
            source,
            status: LeadStatus::Pending,
            metadata: BTreeMap::new(),
        }
    }

    /// Whether a non-blank website is present.
    #[must_use]
    pub fn has_website(&self) -> bool {
        non_blank(self.website.as_deref())
    }

    /// Whether a non-blank email is present.
    #[must_use]
    pub fn has_email(&self) -> bool {
        non_blank(self.email.as_deref())
    }

    /// Whether a non-blank phone is present.
    #[must_use]
    pub fn has_phone(&self) -> bool {
        non_blank(self.phone.as_deref())
    }

    /// Host of the website with scheme, `www.` and path stripped.
    ///
    /// Returns `None` when the lead has no usable website.
    #[must_use]
    pub fn domain(&self) -> Option<String> {
        static HOST_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = HOST_REGEX.get_or_init(|| {
            Regex::new(r"^(?:[a-z][a-z0-9+.-]*://)?(?:www\.)?([^/:?#\s]+)").expect("valid regex")
        });

        let website = self.website.as_deref()?.trim().to_lowercase();
        let host = regex.captures(&website)?.get(1)?.as_str().to_string();
        host.contains('.').then_some(host)
    }

    /// Score stored in metadata, if the lead has been scored.
    #[must_use]
    pub fn score(&self) -> Option<u8> {
        self.metadata
            .get(METADATA_SCORE)
            .and_then(serde_json::Value::as_u64)
            .and_then(|s| u8::try_from(s).ok())
    }

    /// Tier stored in metadata, if the lead has been scored.
    #[must_use]
    pub fn tier(&self) -> Option<Tier> {
        self.metadata
            .get(METADATA_TIER)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Store a score and its tier in metadata.
    pub fn set_score(&mut self, score: u8) {
        let tier = Tier::from_score(score);
        self.metadata
            .insert(METADATA_SCORE.to_string(), serde_json::Value::from(score));
        self.metadata.insert(
            METADATA_TIER.to_string(),
            serde_json::Value::from(tier.as_str()),
        );
    }
}

fn non_blank(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

/// Exclusionary lead filters.
///
/// Each flag removes leads; none of them adds any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadFilters {
    /// Drop leads that have a website (keep only businesses without one)
    pub exclude_with_website: bool,
    /// Drop leads without an email
    pub require_email: bool,
    /// Drop leads without a phone
    pub require_phone: bool,
}

/// Optional enrichment steps applied after scoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentOptions {
    /// Keep only leads whose phone is registered on the messaging service
    pub check_messaging_presence: bool,
    /// Look up missing emails from the lead's website domain
    pub discover_emails: bool,
    /// Keep only leads with a verified email
    pub verify_emails: bool,
}

impl EnrichmentOptions {
    /// Whether any enrichment step is enabled.
    #[must_use]
    pub fn any(&self) -> bool {
        self.check_messaging_presence || self.discover_emails || self.verify_emails
    }
}

/// What the caller wants from a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPreferences {
    /// Business niche, used as the base search query
    pub niche: String,
    /// Countries and/or cities to search
    pub locations: Vec<String>,
    /// Number of committed leads that ends the run
    pub target_lead_count: u32,
    /// Exclusionary filters
    #[serde(default)]
    pub filters: LeadFilters,
    /// Enrichment steps
    #[serde(default)]
    pub enrichment: EnrichmentOptions,
    /// Sources to search; empty means every registered source
    #[serde(default)]
    pub sources: Vec<LeadSource>,
}

impl SearchPreferences {
    /// Create preferences with no filters, no enrichment and all sources.
    #[must_use]
    pub fn new(niche: impl Into<String>, locations: Vec<String>, target_lead_count: u32) -> Self {
        Self {
            niche: niche.into(),
            locations,
            target_lead_count,
            filters: LeadFilters::default(),
            enrichment: EnrichmentOptions::default(),
            sources: Vec::new(),
        }
    }

    /// Set the lead filters.
    #[must_use]
    pub fn with_filters(mut self, filters: LeadFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Set the enrichment options.
    #[must_use]
    pub fn with_enrichment(mut self, enrichment: EnrichmentOptions) -> Self {
        self.enrichment = enrichment;
        self
    }

    /// Restrict the run to specific sources.
    #[must_use]
    pub fn with_sources(mut self, sources: Vec<LeadSource>) -> Self {
        self.sources = sources;
        self
    }

    /// Check that the preferences describe a runnable search.
    ///
    /// # Errors
    /// Returns `ProspectorError::Validation` for a blank niche, no locations
    /// or a zero target.
    pub fn validate(&self) -> Result<(), ProspectorError> {
        if self.niche.trim().is_empty() {
            return Err(ProspectorError::Validation(
                "niche must not be empty".to_string(),
            ));
        }
        if self.locations.iter().all(|l| l.trim().is_empty()) {
            return Err(ProspectorError::Validation(
                "at least one location is required".to_string(),
            ));
        }
        if self.target_lead_count == 0 {
            return Err(ProspectorError::Validation(
                "target lead count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Wrapper around `chrono::DateTime<Utc>` for consistent timestamp handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a timestamp representing the current moment.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Get the inner `DateTime<Utc>`.
    #[must_use]
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Parse a timestamp from an RFC3339 string.
    pub fn from_rfc3339(s: &str) -> Result<Self, ProspectorError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self(dt.with_timezone(&Utc)))
            .map_err(|e| ProspectorError::Validation(format!("invalid timestamp: {e}")))
    }

    /// Format as RFC3339 string.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}
