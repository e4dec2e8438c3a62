//! Occasional encouraging line appended to analyses flagged `cosmic`.

use rand::Rng;

use crate::normalize::StructuredAnalysis;

pub const COSMIC_SUFFIXES: [&str; 4] = [
    "✨ A tiny cosmic note — breathe, we’ll sort this out.",
    "🌿 Remember: small steps today create big changes tomorrow.",
    "☀️ Even storms pass. Take the next small step.",
    "🪐 You’re not alone — we’re on this path together.",
];

/// With `probability`, append one suffix to `summary` and to `friendly`
/// (which becomes the suffix alone if unset). Returns whether it applied.
pub fn add_cosmic_touch<R: Rng + ?Sized>(
    analysis: &mut StructuredAnalysis,
    probability: f64,
    rng: &mut R,
) -> bool {
    if !analysis.cosmic || rng.r#gen::<f64>() >= probability {
        return false;
    }
    let pick = COSMIC_SUFFIXES[rng.gen_range(0..COSMIC_SUFFIXES.len())];
    analysis.summary = format!("{} {pick}", analysis.summary);
    analysis.friendly = Some(match analysis.friendly.take() {
        Some(friendly) if !friendly.is_empty() => format!("{friendly} {pick}"),
        _ => pick.to_string(),
    });
    true
}
