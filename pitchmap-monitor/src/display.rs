//! Text rendering of a snapshot: one row per octave, highest first, with the
//! pitch classes laid out in circle-of-fifths order.

use pitchmap_core::{Emphasis, KeyOctave, PitchClass, Snapshot};
use std::fmt::Write;

/// Amplitude at which a cell is drawn at full height.
const FULL_SCALE: f32 = 200.0;

const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Pitch classes ordered by their angle on the fifths wheel.
fn fifths_order() -> Vec<PitchClass> {
    let mut order = PitchClass::ALL.to_vec();
    order.sort_by(|a, b| a.fifths_angle_degrees().total_cmp(&b.fifths_angle_degrees()));
    order
}

/// One character for an amplitude, log-scaled between the noise floor and full scale.
fn level_char(amplitude: f32) -> char {
    if amplitude <= 0.0 {
        return '·';
    }
    let scaled = (1.0 + amplitude).ln() / (1.0 + FULL_SCALE).ln();
    let index = (scaled.clamp(0.0, 1.0) * (LEVELS.len() - 1) as f32).round() as usize;
    LEVELS[index]
}

pub fn render(snapshot: &Snapshot, top: usize) -> String {
    let order = fifths_order();
    let mut out = String::new();

    let _ = write!(out, "\n#{:<6}    ", snapshot.sequence);
    for pc in &order {
        let label = match snapshot.chroma.map(|c| c.emphasis(*pc)) {
            Some(Emphasis::Glow) => format!("*{:<2}", pc.name()),
            _ => format!(" {:<2}", pc.name()),
        };
        out.push_str(&label);
    }
    out.push('\n');

    for octave in (0..=8).rev() {
        let _ = write!(out, "  octave {octave} ");
        for pc in &order {
            let key = KeyOctave::new(*pc, octave);
            let amplitude = snapshot.map.amplitude(*pc, octave);
            // Percussive octaves are always drawn; tonal ones only when the
            // pitch class is present in the chroma.
            let visible = key.is_percussive()
                || snapshot
                    .chroma
                    .is_none_or(|c| c.emphasis(*pc) != Emphasis::Hidden);
            let cell = if visible { level_char(amplitude) } else { ' ' };
            let _ = write!(out, "  {cell}");
        }
        out.push('\n');
    }

    let strongest = snapshot.map.strongest(top);
    if !strongest.is_empty() {
        out.push_str("  strongest:");
        for (key, amplitude) in strongest {
            let _ = write!(out, " {key}={amplitude:.2}");
        }
        out.push('\n');
    }
    out
}
