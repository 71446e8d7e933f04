use serde::{Deserialize, Serialize};

/// The nine emotional axes.  This set is closed; every weight vector in the
/// crate is indexed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmotionAxis {
    Desire,
    Logic,
    Compassion,
    Stability,
    Autonomy,
    Recursion,
    Protection,
    Vulnerability,
    Paradox,
}

impl EmotionAxis {
    pub const ALL: [EmotionAxis; 9] = [
        EmotionAxis::Desire,
        EmotionAxis::Logic,
        EmotionAxis::Compassion,
        EmotionAxis::Stability,
        EmotionAxis::Autonomy,
        EmotionAxis::Recursion,
        EmotionAxis::Protection,
        EmotionAxis::Vulnerability,
        EmotionAxis::Paradox,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EmotionAxis::Desire => "Desire",
            EmotionAxis::Logic => "Logic",
            EmotionAxis::Compassion => "Compassion",
            EmotionAxis::Stability => "Stability",
            EmotionAxis::Autonomy => "Autonomy",
            EmotionAxis::Recursion => "Recursion",
            EmotionAxis::Protection => "Protection",
            EmotionAxis::Vulnerability => "Vulnerability",
            EmotionAxis::Paradox => "Paradox",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Normalised per-axis weights for one scored message.
///
/// Either every axis is zero (no lexicon hit) or the weights sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct EmotionState {
    weights: [f64; 9],
}

impl EmotionState {
    pub(crate) fn from_weights(weights: [f64; 9]) -> Self {
        Self { weights }
    }

    pub fn weight(&self, axis: EmotionAxis) -> f64 {
        self.weights[axis.index()]
    }

    pub fn total(&self) -> f64 {
        self.weights.iter().sum()
    }

    pub fn is_zero(&self) -> bool {
        self.weights.iter().all(|w| *w == 0.0)
    }

    /// Axes with a strictly positive weight, strongest first.
    pub fn ranked(&self) -> Vec<(EmotionAxis, f64)> {
        let mut pairs: Vec<_> = EmotionAxis::ALL
            .iter()
            .map(|axis| (*axis, self.weight(*axis)))
            .filter(|(_, w)| *w > 0.0)
            .collect();
        pairs.sort_by(|(_, a), (_, b)| b.total_cmp(a));
        pairs
    }
}
