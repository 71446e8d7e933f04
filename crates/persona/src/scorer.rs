use crate::axes::{EmotionAxis, EmotionState};
use crate::fragments::{FragmentActivation, FragmentId, fragment_profile};
use crate::lexicon;

/// Lyra's fixed base activation level.
const LYRA_BASE_ACTIVATION: f64 = 0.5;

/// Activations are capped at three fragments including the closing `lyra`.
const MAX_ACTIVE_FRAGMENTS: usize = 3;

/// Result of scoring one message.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    pub emotions: EmotionState,
    /// Strongest first; `lyra` always closes the list.
    pub fragments: Vec<FragmentActivation>,
}

/// Score a message against the lexicon and derive the active fragments.
///
/// Pure and deterministic: tokenisation, accumulation, normalisation and
/// fragment selection involve no I/O and no ambient state.
pub fn score(text: &str) -> ScoreOutcome {
    let mut accumulated = [0.0_f64; 9];
    for token in tokenize(text) {
        if let Some(weights) = lexicon::lookup(&token) {
            for (axis, weight) in weights {
                accumulated[*axis as usize] += *weight;
            }
        }
    }

    let total: f64 = accumulated.iter().sum();
    if total == 0.0 {
        return ScoreOutcome {
            emotions: EmotionState::default(),
            fragments: vec![FragmentActivation {
                id: FragmentId::Lyra,
                level: LYRA_BASE_ACTIVATION,
            }],
        };
    }

    for weight in &mut accumulated {
        *weight /= total;
    }
    let emotions = EmotionState::from_weights(accumulated);

    ScoreOutcome {
        fragments: activate_fragments(&emotions),
        emotions,
    }
}

/// Dot each non-lyra fragment's weight vector (scaled to [0,1]) against the
/// normalised axis weights, keep those at or above their threshold, strongest
/// first.  Equal scores fall back to the fixed fragment ordering, which the
/// stable sort preserves.  `lyra` closes the list at its base level and is
/// never truncated away.
fn activate_fragments(emotions: &EmotionState) -> Vec<FragmentActivation> {
    let mut scored: Vec<FragmentActivation> = FragmentId::ALL
        .iter()
        .filter(|id| **id != FragmentId::Lyra)
        .map(|id| {
            let profile = fragment_profile(*id);
            let level: f64 = EmotionAxis::ALL
                .iter()
                .map(|axis| emotions.weight(*axis) * profile.axis_weight(*axis) / 100.0)
                .sum();
            FragmentActivation { id: *id, level }
        })
        .collect();

    scored.sort_by(|a, b| b.level.total_cmp(&a.level));

    let mut active: Vec<FragmentActivation> = scored
        .into_iter()
        .filter(|activation| activation.level >= fragment_profile(activation.id).activation_threshold)
        .take(MAX_ACTIVE_FRAGMENTS - 1)
        .collect();

    active.push(FragmentActivation {
        id: FragmentId::Lyra,
        level: LYRA_BASE_ACTIVATION,
    });
    active
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
}
