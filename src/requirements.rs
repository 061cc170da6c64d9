use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder an extractor emits for a field the user did not provide.
pub const NOT_SPECIFIED: &str = "Not specified";

/// Structured travel request extracted from the user's message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelRequirements {
    pub destination: Option<String>,
    pub dates: Option<String>,
    pub card: Option<String>,
}

impl TravelRequirements {
    /// Build requirements, treating blank and "Not specified" values as absent.
    pub fn new(destination: Option<&str>, dates: Option<&str>, card: Option<&str>) -> Self {
        Self {
            destination: normalize(destination),
            dates: normalize(dates),
            card: normalize(card),
        }
    }

    pub fn is_destination_known(&self) -> bool {
        self.destination.is_some()
    }

    pub fn with_destination(mut self, destination: &str) -> Self {
        self.destination = normalize(Some(destination));
        self
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.destination.is_none() {
            missing.push("destination");
        }
        if self.dates.is_none() {
            missing.push("dates");
        }
        if self.card.is_none() {
            missing.push("card");
        }
        missing
    }

    /// Question asked when the request cannot be planned as given.
    pub fn clarification_question(&self) -> Option<String> {
        if self.destination.is_some() {
            return None;
        }
        Some(match &self.dates {
            Some(dates) => format!("Where would you like to travel for {dates}?"),
            None => "What is your destination?".to_string(),
        })
    }
}

impl fmt::Display for TravelRequirements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = |value: &Option<String>| value.as_deref().unwrap_or(NOT_SPECIFIED).to_string();
        write!(
            f,
            "destination={}, dates={}, card={}",
            field(&self.destination),
            field(&self.dates),
            field(&self.card)
        )
    }
}

fn normalize(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case(NOT_SPECIFIED))
        .map(str::to_string)
}

/// Turns a free-form request into `TravelRequirements`.
///
/// The LLM-backed implementation lives outside this crate.
#[async_trait]
pub trait RequirementExtractor: Send + Sync {
    async fn extract(&self, user_input: &str) -> anyhow::Result<TravelRequirements>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_specified_maps_to_none() {
        let req = TravelRequirements::new(Some("Not specified"), Some("  "), Some("BankGold"));
        assert_eq!(req.destination, None);
        assert_eq!(req.dates, None);
        assert_eq!(req.card.as_deref(), Some("BankGold"));
        assert_eq!(req.missing_fields(), vec!["destination", "dates"]);
        assert_eq!(
            req.to_string(),
            "destination=Not specified, dates=Not specified, card=BankGold"
        );
    }

    #[test]
    fn test_clarification_question() {
        let known = TravelRequirements::new(Some("Paris"), None, None);
        assert!(known.is_destination_known());
        assert_eq!(known.clarification_question(), None);

        let unknown = TravelRequirements::new(None, None, None);
        assert_eq!(
            unknown.clarification_question().as_deref(),
            Some("What is your destination?")
        );

        let dated = TravelRequirements::new(None, Some("June"), None);
        assert_eq!(
            dated.clarification_question().as_deref(),
            Some("Where would you like to travel for June?")
        );
    }

    #[test]
    fn test_with_destination() {
        let req = TravelRequirements::default().with_destination(" Lisbon ");
        assert_eq!(req.destination.as_deref(), Some("Lisbon"));
    }

    struct PrefixExtractor;

    #[async_trait]
    impl RequirementExtractor for PrefixExtractor {
        async fn extract(&self, user_input: &str) -> anyhow::Result<TravelRequirements> {
            let destination = user_input
                .strip_prefix("Trip to ")
                .unwrap_or(NOT_SPECIFIED);
            Ok(TravelRequirements::new(Some(destination), None, None))
        }
    }

    #[tokio::test]
    async fn test_extractor_output_is_normalized() {
        let extractor: Box<dyn RequirementExtractor> = Box::new(PrefixExtractor);

        let req = extractor.extract("Trip to Kyoto").await.unwrap();
        assert_eq!(req.destination.as_deref(), Some("Kyoto"));

        let req = extractor.extract("somewhere warm").await.unwrap();
        assert!(!req.is_destination_known());
    }
}
