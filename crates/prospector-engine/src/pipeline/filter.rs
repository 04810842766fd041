//! Exclusionary preference filters.

use prospector_core::{Lead, LeadFilters};

/// Why a lead was filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    /// The lead has a website and only website-less businesses are wanted
    HasWebsite,
    /// The lead has no email and one is required
    MissingEmail,
    /// The lead has no phone and one is required
    MissingPhone,
}

impl std::fmt::Display for FilterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HasWebsite => write!(f, "has a website"),
            Self::MissingEmail => write!(f, "no email"),
            Self::MissingPhone => write!(f, "no phone"),
        }
    }
}

/// Check a lead against the filters.
///
/// Each flag only removes leads. `exclude_with_website` drops leads that
/// *have* a website; `require_email` and `require_phone` drop leads that
/// *lack* the field.
pub fn check(lead: &Lead, filters: &LeadFilters) -> Result<(), FilterReason> {
    if filters.exclude_with_website && lead.has_website() {
        return Err(FilterReason::HasWebsite);
    }
    if filters.require_email && !lead.has_email() {
        return Err(FilterReason::MissingEmail);
    }
    if filters.require_phone && !lead.has_phone() {
        return Err(FilterReason::MissingPhone);
    }
    Ok(())
}
