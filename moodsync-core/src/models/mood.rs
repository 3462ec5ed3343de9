use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The emotional state recorded by a mood entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoodCategory {
    Anger,
    Confusion,
    Disgust,
    Fear,
    Happiness,
    Sadness,
    Shame,
    Surprise,
}

impl MoodCategory {
    pub const ALL: [MoodCategory; 8] = [
        MoodCategory::Anger,
        MoodCategory::Confusion,
        MoodCategory::Disgust,
        MoodCategory::Fear,
        MoodCategory::Happiness,
        MoodCategory::Sadness,
        MoodCategory::Shame,
        MoodCategory::Surprise,
    ];

    /// Valence score plotted on mood charts.
    pub fn score(&self) -> f64 {
        match self {
            MoodCategory::Happiness => 2.0,
            MoodCategory::Surprise => 1.0,
            MoodCategory::Confusion => 0.0,
            MoodCategory::Shame | MoodCategory::Fear | MoodCategory::Disgust => -1.0,
            MoodCategory::Sadness | MoodCategory::Anger => -2.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MoodCategory::Anger => "anger",
            MoodCategory::Confusion => "confusion",
            MoodCategory::Disgust => "disgust",
            MoodCategory::Fear => "fear",
            MoodCategory::Happiness => "happiness",
            MoodCategory::Sadness => "sadness",
            MoodCategory::Shame => "shame",
            MoodCategory::Surprise => "surprise",
        }
    }
}

impl fmt::Display for MoodCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MoodCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anger" | "angry" => Ok(MoodCategory::Anger),
            "confusion" | "confused" => Ok(MoodCategory::Confusion),
            "disgust" => Ok(MoodCategory::Disgust),
            "fear" | "scared" => Ok(MoodCategory::Fear),
            "happiness" | "happy" => Ok(MoodCategory::Happiness),
            "sadness" | "sad" => Ok(MoodCategory::Sadness),
            "shame" => Ok(MoodCategory::Shame),
            "surprise" | "surprised" => Ok(MoodCategory::Surprise),
            _ => Err(format!(
                "Invalid mood '{}'. Valid options: anger, confusion, disgust, fear, \
                 happiness, sadness, shame, surprise",
                s
            )),
        }
    }
}

/// Who was around when the mood was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SocialSituation {
    Alone,
    OnePerson,
    TwoPeople,
    Crowd,
}

impl fmt::Display for SocialSituation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocialSituation::Alone => write!(f, "alone"),
            SocialSituation::OnePerson => write!(f, "one-person"),
            SocialSituation::TwoPeople => write!(f, "two-people"),
            SocialSituation::Crowd => write!(f, "crowd"),
        }
    }
}

impl FromStr for SocialSituation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '_'], "-").as_str() {
            "alone" => Ok(SocialSituation::Alone),
            "one-person" => Ok(SocialSituation::OnePerson),
            "two-people" => Ok(SocialSituation::TwoPeople),
            "crowd" => Ok(SocialSituation::Crowd),
            _ => Err(format!(
                "Invalid social situation '{}'. Valid options: alone, one-person, two-people, crowd",
                s
            )),
        }
    }
}

/// Whether followers may see an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Public => write!(f, "public"),
            Visibility::Private => write!(f, "private"),
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            _ => Err(format!(
                "Invalid visibility '{}'. Valid options: public, private",
                s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mood_from_str_accepts_aliases() {
        assert_eq!(MoodCategory::from_str("happy").unwrap(), MoodCategory::Happiness);
        assert_eq!(MoodCategory::from_str("Sadness").unwrap(), MoodCategory::Sadness);
        assert_eq!(MoodCategory::from_str(" ANGRY ").unwrap(), MoodCategory::Anger);
        assert!(MoodCategory::from_str("bored").is_err());
    }

    #[test]
    fn test_mood_display_roundtrip() {
        for mood in MoodCategory::ALL {
            assert_eq!(MoodCategory::from_str(&mood.to_string()).unwrap(), mood);
        }
    }

    #[test]
    fn test_scores_are_ordered_by_valence() {
        assert!(MoodCategory::Happiness.score() > MoodCategory::Surprise.score());
        assert!(MoodCategory::Surprise.score() > MoodCategory::Confusion.score());
        assert!(MoodCategory::Confusion.score() > MoodCategory::Fear.score());
        assert!(MoodCategory::Fear.score() > MoodCategory::Sadness.score());
    }

    #[test]
    fn test_social_situation_parsing() {
        assert_eq!(
            SocialSituation::from_str("Two People").unwrap(),
            SocialSituation::TwoPeople
        );
        assert_eq!(
            SocialSituation::from_str("one_person").unwrap(),
            SocialSituation::OnePerson
        );
        assert!(SocialSituation::from_str("party").is_err());
    }

    #[test]
    fn test_mood_json_uses_lowercase() {
        let json = serde_json::to_string(&MoodCategory::Happiness).unwrap();
        assert_eq!(json, "\"happiness\"");
        let json = serde_json::to_string(&SocialSituation::TwoPeople).unwrap();
        assert_eq!(json, "\"two-people\"");
    }
}
