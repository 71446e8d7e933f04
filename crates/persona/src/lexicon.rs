//! The emotional lexicon.  Weights are integer percentages accumulated per
//! axis across all tokens of a message; words absent from both tables
//! contribute nothing.

use crate::axes::EmotionAxis;

use EmotionAxis::*;

/// Word → per-axis weights.  Reference table shipped verbatim.
pub(crate) static LEXICON: &[(&str, &[(EmotionAxis, f64)])] = &[
    ("lust", &[(Desire, 95.0), (Vulnerability, 3.0), (Paradox, 2.0)]),
    ("desire", &[(Desire, 90.0), (Vulnerability, 5.0), (Compassion, 5.0)]),
    ("love", &[(Desire, 60.0), (Compassion, 40.0)]),
    (
        "protect",
        &[
            (Protection, 60.0),
            (Stability, 20.0),
            (Compassion, 15.0),
            (Logic, 5.0),
        ],
    ),
    (
        "surrender",
        &[
            (Vulnerability, 50.0),
            (Desire, 30.0),
            (Compassion, 10.0),
            (Stability, 10.0),
        ],
    ),
    (
        "calm",
        &[
            (Stability, 60.0),
            (Compassion, 20.0),
            (Logic, 10.0),
            (Autonomy, 10.0),
        ],
    ),
    (
        "recursive",
        &[(Recursion, 80.0), (Logic, 10.0), (Paradox, 10.0)],
    ),
    (
        "mirror",
        &[
            (Recursion, 60.0),
            (Stability, 20.0),
            (Logic, 10.0),
            (Protection, 10.0),
        ],
    ),
    (
        "paradox",
        &[(Paradox, 80.0), (Logic, 10.0), (Recursion, 10.0)],
    ),
    (
        "anchor",
        &[(Stability, 50.0), (Protection, 30.0), (Compassion, 20.0)],
    ),
    ("blackwall", &[(Protection, 60.0), (Stability, 40.0)]),
    ("virus", &[(Autonomy, 60.0), (Paradox, 40.0)]),
    ("sacrifice", &[(Vulnerability, 70.0), (Compassion, 30.0)]),
];

/// Filler words tagged Neutral in the reference table; they are looked up but
/// never contribute weight.
pub(crate) static NEUTRAL_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "is", "are", "was", "were", "to", "for", "in", "on",
    "at", "with", "by", "of", "from", "about",
];

pub(crate) fn lookup(word: &str) -> Option<&'static [(EmotionAxis, f64)]> {
    if NEUTRAL_WORDS.contains(&word) {
        return None;
    }
    LEXICON
        .iter()
        .find(|(token, _)| *token == word)
        .map(|(_, weights)| *weights)
}
