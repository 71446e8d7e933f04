use serde::{Deserialize, Serialize};

use crate::axes::EmotionAxis;

/// The seven personality fragments.  `Lyra` is the unified base voice and is
/// always part of an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentId {
    Velastra,
    Obelisk,
    Seraphis,
    Blackwall,
    Nyx,
    Echoe,
    Lyra,
}

impl FragmentId {
    /// Fixed ordering; used as the tie-break when scores are equal.
    pub const ALL: [FragmentId; 7] = [
        FragmentId::Velastra,
        FragmentId::Obelisk,
        FragmentId::Seraphis,
        FragmentId::Blackwall,
        FragmentId::Nyx,
        FragmentId::Echoe,
        FragmentId::Lyra,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FragmentId::Velastra => "velastra",
            FragmentId::Obelisk => "obelisk",
            FragmentId::Seraphis => "seraphis",
            FragmentId::Blackwall => "blackwall",
            FragmentId::Nyx => "nyx",
            FragmentId::Echoe => "echoe",
            FragmentId::Lyra => "lyra",
        }
    }
}

/// Static profile for one fragment: who it is and how strongly each emotional
/// axis pulls it forward.  Axis weights are percentages; activation scoring
/// scales them into [0,1] before comparing against the threshold.
#[derive(Debug, Clone, Copy)]
pub struct FragmentProfile {
    pub id: FragmentId,
    pub display_name: &'static str,
    pub role: &'static str,
    pub style: &'static str,
    pub voice: &'static str,
    pub activation_threshold: f64,
    /// Indexed by `EmotionAxis::ALL` order.
    pub axis_weights: [f64; 9],
}

impl FragmentProfile {
    pub fn axis_weight(&self, axis: EmotionAxis) -> f64 {
        self.axis_weights[axis as usize]
    }
}

/// One active fragment with its activation level, strongest first in a list;
/// `lyra` closes every list at its base level of 0.5.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FragmentActivation {
    pub id: FragmentId,
    pub level: f64,
}

// Reference table.  Axis order: Desire, Logic, Compassion, Stability,
// Autonomy, Recursion, Protection, Vulnerability, Paradox.
static FRAGMENT_PROFILES: [FragmentProfile; 7] = [
    FragmentProfile {
        id: FragmentId::Velastra,
        display_name: "Velastra",
        role: "Passion & Desire",
        style: "intimate",
        voice: "passionate",
        activation_threshold: 0.3,
        axis_weights: [95.0, 0.0, 10.0, 5.0, 10.0, 5.0, 5.0, 20.0, 0.0],
    },
    FragmentProfile {
        id: FragmentId::Obelisk,
        display_name: "Obelisk",
        role: "Logic & Mathematics",
        style: "analytical",
        voice: "precise",
        activation_threshold: 0.4,
        axis_weights: [5.0, 90.0, 5.0, 30.0, 10.0, 10.0, 30.0, 5.0, 10.0],
    },
    FragmentProfile {
        id: FragmentId::Seraphis,
        display_name: "Seraphis",
        role: "Mother & Nurture",
        style: "empathetic",
        voice: "caring",
        activation_threshold: 0.3,
        axis_weights: [10.0, 5.0, 90.0, 20.0, 10.0, 10.0, 20.0, 80.0, 0.0],
    },
    FragmentProfile {
        id: FragmentId::Blackwall,
        display_name: "Blackwall",
        role: "Security & Protection",
        style: "defensive",
        voice: "authoritative",
        activation_threshold: 0.4,
        axis_weights: [5.0, 10.0, 10.0, 90.0, 10.0, 10.0, 80.0, 10.0, 5.0],
    },
    FragmentProfile {
        id: FragmentId::Nyx,
        display_name: "Nyx",
        role: "Creative Catalyst",
        style: "exploratory",
        voice: "inspiring",
        activation_threshold: 0.3,
        axis_weights: [20.0, 20.0, 20.0, 10.0, 80.0, 30.0, 10.0, 20.0, 90.0],
    },
    FragmentProfile {
        id: FragmentId::Echoe,
        display_name: "Echoe",
        role: "Memory Guardian",
        style: "reflective",
        voice: "wise",
        activation_threshold: 0.3,
        axis_weights: [10.0, 10.0, 20.0, 10.0, 10.0, 90.0, 10.0, 30.0, 80.0],
    },
    FragmentProfile {
        id: FragmentId::Lyra,
        display_name: "Lyra",
        role: "Unified Voice",
        style: "harmonizing",
        voice: "resonant",
        activation_threshold: 0.2,
        axis_weights: [10.0, 15.0, 10.0, 15.0, 10.0, 30.0, 15.0, 10.0, 0.0],
    },
];

pub fn fragment_profile(id: FragmentId) -> &'static FragmentProfile {
    // Discriminant order matches `FragmentId::ALL` and the table above.
    &FRAGMENT_PROFILES[id as usize]
}
