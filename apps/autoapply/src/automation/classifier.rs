use super::profile::SignalPatterns;

/// What the listing page says before any form is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingState {
    Open,
    Closed,
    AlreadyApplied,
    ExternalOnly,
}

/// What the page says after the form was submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionVerdict {
    Accepted,
    Rejected(String),
    AlreadyApplied,
    Unknown,
}

/// Strategy that reads third-party page text. Kept apart from the worker so
/// site-specific heuristics never leak into the lifecycle rules.
pub trait OutcomeClassifier: Send + Sync {
    fn listing_state(&self, page_text: &str) -> ListingState;

    fn verdict(&self, page_text: &str) -> SubmissionVerdict;
}

/// Case-insensitive substring matching against the profile's signal lists.
pub struct KeywordClassifier {
    signals: SignalPatterns,
}

impl KeywordClassifier {
    pub fn new(signals: SignalPatterns) -> Self {
        Self { signals }
    }
}

fn first_match<'a>(text: &str, patterns: &'a [String]) -> Option<&'a str> {
    patterns
        .iter()
        .map(|p| p.trim())
        .find(|p| !p.is_empty() && text.contains(&p.to_lowercase()))
}

impl OutcomeClassifier for KeywordClassifier {
    fn listing_state(&self, page_text: &str) -> ListingState {
        let text = page_text.to_lowercase();
        if first_match(&text, &self.signals.already_applied).is_some() {
            ListingState::AlreadyApplied
        } else if first_match(&text, &self.signals.closed).is_some() {
            ListingState::Closed
        } else if first_match(&text, &self.signals.external_only).is_some() {
            ListingState::ExternalOnly
        } else {
            ListingState::Open
        }
    }

    // Errors are checked before success so a validation message is never
    // mistaken for a confirmation.
    fn verdict(&self, page_text: &str) -> SubmissionVerdict {
        let text = page_text.to_lowercase();
        if first_match(&text, &self.signals.already_applied).is_some() {
            SubmissionVerdict::AlreadyApplied
        } else if let Some(pattern) = first_match(&text, &self.signals.error) {
            SubmissionVerdict::Rejected(pattern.to_string())
        } else if first_match(&text, &self.signals.success).is_some() {
            SubmissionVerdict::Accepted
        } else {
            SubmissionVerdict::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> KeywordClassifier {
        KeywordClassifier::new(SignalPatterns::default())
    }

    #[test]
    fn test_listing_states() {
        let c = classifier();
        assert_eq!(c.listing_state("Senior Rust Engineer\nApply now"), ListingState::Open);
        assert_eq!(
            c.listing_state("Sorry, this job is no longer available."),
            ListingState::Closed
        );
        assert_eq!(
            c.listing_state("Offerta scaduta il 12/03"),
            ListingState::Closed
        );
        assert_eq!(
            c.listing_state("You have already applied to this position"),
            ListingState::AlreadyApplied
        );
        assert_eq!(
            c.listing_state("Apply on company website"),
            ListingState::ExternalOnly
        );
    }

    #[test]
    fn test_verdicts() {
        let c = classifier();
        assert_eq!(
            c.verdict("Thank you for applying! We'll be in touch."),
            SubmissionVerdict::Accepted
        );
        assert_eq!(
            c.verdict("Grazie per la tua candidatura"),
            SubmissionVerdict::Accepted
        );
        assert_eq!(
            c.verdict("Please correct the errors below. This field is required."),
            SubmissionVerdict::Rejected("please correct the errors".to_string())
        );
        assert_eq!(
            c.verdict("Hai già inviato la tua candidatura per questa offerta"),
            SubmissionVerdict::AlreadyApplied
        );
        assert_eq!(c.verdict("Loading..."), SubmissionVerdict::Unknown);
    }

    #[test]
    fn test_error_wins_over_success_text() {
        let c = classifier();
        assert!(matches!(
            c.verdict("Application received? An error occurred, try again"),
            SubmissionVerdict::Rejected(_)
        ));
    }

    #[test]
    fn test_custom_patterns_are_case_insensitive() {
        let c = KeywordClassifier::new(SignalPatterns {
            success: vec!["Bewerbung Erhalten".to_string()],
            ..SignalPatterns::default()
        });
        assert_eq!(c.verdict("IHRE BEWERBUNG ERHALTEN"), SubmissionVerdict::Accepted);
    }
}
