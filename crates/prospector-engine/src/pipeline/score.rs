//! Additive lead scoring.

use prospector_core::Lead;

const HIGH_RATING: f32 = 4.5;
const MANY_REVIEWS: u32 = 50;

/// Points earned by a lead.
///
/// | Signal | Points |
/// |--------|--------|
/// | no website | 3 |
/// | email | 2 |
/// | phone | 1 |
/// | rating >= 4.5 | 1 |
/// | 50+ reviews | 1 |
/// | messaging presence | 1 |
#[must_use]
pub fn score(lead: &Lead) -> u8 {
    let mut points = 0;
    if !lead.has_website() {
        points += 3;
    }
    if lead.has_email() {
        points += 2;
    }
    if lead.has_phone() {
        points += 1;
    }
    if lead.rating.is_some_and(|r| r >= HIGH_RATING) {
        points += 1;
    }
    if lead.review_count.is_some_and(|c| c >= MANY_REVIEWS) {
        points += 1;
    }
    if lead.has_whatsapp {
        points += 1;
    }
    points
}

/// Score the lead and store score and tier in its metadata.
pub fn apply(lead: &mut Lead) -> u8 {
    let points = score(lead);
    lead.set_score(points);
    points
}
