use serde::{Serialize, Serializer};
use std::fmt;

const MAGNITUDE_PREFIX: &str = "Magnitude ";

/// Base tier tag; holders count as human users in the snapshot.
pub const BASE_TIER_TAG: &str = "Magnitude 1";
pub const VERIFIED_TAG: &str = "Verified";
pub const LEADERSHIP_TAG: &str = "Moderator";

/// A magnitude value kept in tenths so that it orders exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Magnitude(u32);

impl Magnitude {
    pub fn from_tenths(tenths: u32) -> Self {
        Self(tenths)
    }

    /// Integer tier, `floor(value)`.
    pub fn tier(self) -> u32 {
        self.0 / 10
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / 10.0
    }

    pub fn parse_tag(tag: &str) -> Option<Self> {
        parse_number(tag.strip_prefix(MAGNITUDE_PREFIX)?).map(Self)
    }
}

/// Serialised as the decimal value, e.g. `4.5`.
impl Serialize for Magnitude {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl fmt::Display for Magnitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 10 == 0 {
            write!(f, "{}", self.0 / 10)
        } else {
            write!(f, "{}.{}", self.0 / 10, self.0 % 10)
        }
    }
}

/// Accepts `N` or `N.D`; anything else is not a magnitude.
fn parse_number(raw: &str) -> Option<u32> {
    let (whole, fraction) = match raw.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (raw, None),
    };

    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let tenth = match fraction {
        None => 0,
        Some(digit) if digit.len() == 1 && digit.bytes().all(|b| b.is_ascii_digit()) => {
            digit.parse::<u32>().ok()?
        }
        Some(_) => return None,
    };

    whole.parse::<u32>().ok()?.checked_mul(10)?.checked_add(tenth)
}

/// Highest `Magnitude <n>` value in the role list, if any tag matches.
pub fn resolve_magnitude(roles: Option<&[String]>) -> Option<Magnitude> {
    roles?
        .iter()
        .filter_map(|role| Magnitude::parse_tag(role))
        .max()
}

pub fn has_base_tier(roles: Option<&[String]>) -> bool {
    roles.is_some_and(|roles| roles.iter().any(|role| role == BASE_TIER_TAG))
}

/// Breakdown key used for a resolved tier.
pub fn tier_key(magnitude: Magnitude) -> String {
    format!("{MAGNITUDE_PREFIX}{}", magnitude.tier())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierStyle {
    pub tier: u32,
    pub label: &'static str,
    pub color: &'static str,
}

const TIER_PALETTE: [(&str, &str); 9] = [
    ("Spark", "#9ca3af"),
    ("Ember", "#f97316"),
    ("Flare", "#f59e0b"),
    ("Comet", "#84cc16"),
    ("Nova", "#22c55e"),
    ("Pulsar", "#06b6d4"),
    ("Quasar", "#3b82f6"),
    ("Nebula", "#8b5cf6"),
    ("Supernova", "#ec4899"),
];

pub fn tier_style(tier: u32) -> Option<TierStyle> {
    let index = usize::try_from(tier).ok()?.checked_sub(1)?;
    TIER_PALETTE.get(index).map(|&(label, color)| TierStyle {
        tier,
        label,
        color,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn resolves_highest_matching_tag() {
        let tags = roles(&["Magnitude 3", "Magnitude 7.0", "Verified"]);
        let resolved = resolve_magnitude(Some(tags.as_slice())).expect("tier");
        assert_eq!(resolved.tier(), 7);
        assert_eq!(resolved.to_string(), "7");
    }

    #[test]
    fn keeps_fractional_precision_for_ordering() {
        let tags = roles(&["Magnitude 4.5", "Magnitude 4", "Magnitude 4.2"]);
        let resolved = resolve_magnitude(Some(tags.as_slice())).expect("tier");
        assert_eq!(resolved, Magnitude::from_tenths(45));
        assert_eq!(resolved.tier(), 4);
        assert!((resolved.as_f64() - 4.5).abs() < 1e-9);
    }

    #[test]
    fn serializes_as_decimal_value() {
        let json = serde_json::to_string(&Magnitude::from_tenths(45)).expect("serialize");
        assert_eq!(json, "4.5");
    }

    #[test]
    fn ignores_malformed_suffixes() {
        let tags = roles(&[
            "Magnitude ",
            "Magnitude x",
            "Magnitude 3.25",
            "Magnitude -2",
            "Magnitude 5.",
            "magnitude 9",
            "Magnitude 2",
        ]);
        assert_eq!(resolve_magnitude(Some(tags.as_slice())), Some(Magnitude::from_tenths(20)));
    }

    #[test]
    fn no_tier_when_nothing_matches() {
        assert_eq!(resolve_magnitude(None), None);
        assert_eq!(resolve_magnitude(Some(Vec::new().as_slice())), None);
        assert_eq!(resolve_magnitude(Some(roles(&["Verified", "Moderator"]).as_slice())), None);
    }

    #[test]
    fn duplicate_maximum_does_not_change_result() {
        let tags = roles(&["Magnitude 6", "Magnitude 6", "Magnitude 6.0"]);
        assert_eq!(resolve_magnitude(Some(tags.as_slice())).map(Magnitude::tier), Some(6));
    }

    #[test]
    fn base_tier_requires_exact_tag() {
        assert!(has_base_tier(Some(roles(&["Magnitude 1"]).as_slice())));
        assert!(!has_base_tier(Some(roles(&["Magnitude 1.0", "Magnitude 2"]).as_slice())));
        assert!(!has_base_tier(None));
    }

    #[test]
    fn palette_covers_nine_tiers() {
        assert!(tier_style(0).is_none());
        assert_eq!(tier_style(1).map(|s| s.label), Some("Spark"));
        assert_eq!(tier_style(9).map(|s| s.label), Some("Supernova"));
        assert!(tier_style(10).is_none());
    }
}
