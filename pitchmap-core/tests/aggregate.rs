use approx::assert_abs_diff_eq;
use pitchmap_core::{
    AggregatorConfig, Frame, KeyOctave, PitchClass, SpectralAggregator, map_frequency_to_pitch,
};

fn single_bin_frame(index: usize, amplitude: f32, len: usize, sample_rate: f32) -> Frame {
    let mut spectrum = vec![0.0; len];
    spectrum[index] = amplitude;
    Frame::new(spectrum, sample_rate).unwrap()
}

#[test]
fn all_zero_spectrum_yields_empty_map() {
    let frame = Frame::new(vec![0.0; 1024], 44100.0).unwrap();
    assert!(SpectralAggregator::default().aggregate(&frame).is_empty());
}

#[test]
fn single_low_bin_lands_in_one_weighted_bucket() {
    let frame = single_bin_frame(2, 1.0, 1024, 44100.0);
    assert_abs_diff_eq!(frame.bin_size(), 21.533, epsilon = 1e-3);
    let frequency = frame.bin_frequency(2);
    assert_abs_diff_eq!(frequency, 43.066, epsilon = 1e-3);

    let mapping = map_frequency_to_pitch(frequency).unwrap();
    let weight = (1.0 - mapping.cents.abs() as f32 / 50.0).max(0.0);

    let map = SpectralAggregator::default().aggregate(&frame);
    assert_eq!(map.len(), 1);
    let (key, value) = map.iter().next().unwrap();
    assert_eq!(key, KeyOctave::new(mapping.pitch_class, mapping.octave));
    assert_abs_diff_eq!(value, weight, epsilon = 1e-6);

    // ~43.07 Hz sits between F1 and F#1, closer to F1.
    assert_eq!(key.to_string(), "F1");
    assert!(weight > 0.0 && weight < 1.0);
}

#[test]
fn aggregation_has_no_hidden_state() {
    let mut spectrum: Vec<f32> = (0..1024).map(|i| ((i * 37) % 11) as f32 * 0.1).collect();
    spectrum[100] = f32::NAN;
    let frame = Frame::new(spectrum, 48000.0).unwrap();
    let aggregator = SpectralAggregator::default();

    let first = aggregator.aggregate_with_report(&frame);
    let silent = Frame::new(vec![0.0; 1024], 48000.0).unwrap();
    let _ = aggregator.aggregate(&silent);
    let second = aggregator.aggregate_with_report(&frame);
    assert_eq!(first, second);
}

#[test]
fn frequencies_outside_audible_range_are_ignored() {
    // At 96 kHz with 1024 bins each bin is 46.875 Hz wide; bin 500 is ~23.4 kHz.
    let frame = single_bin_frame(500, 1.0, 1024, 96000.0);
    let (map, report) = SpectralAggregator::default().aggregate_with_report(&frame);
    assert!(map.is_empty());
    assert!(report.out_of_range > 0);
}

#[test]
fn exact_pitch_receives_full_weight() {
    // 8 kHz over 4000 bins gives exactly 1 Hz per bin, so bin 440 is 440 Hz.
    let frame = single_bin_frame(440, 2.0, 4000, 8000.0);
    let map = SpectralAggregator::default().aggregate(&frame);
    assert_abs_diff_eq!(map.amplitude(PitchClass::A, 4), 2.0, epsilon = 1e-6);
}

#[test]
fn narrower_half_width_discards_distant_bins() {
    let frame = single_bin_frame(2, 1.0, 1024, 44100.0);
    let cents = map_frequency_to_pitch(frame.bin_frequency(2)).unwrap().cents.abs() as f32;
    let narrow = SpectralAggregator::new(AggregatorConfig {
        weighting_half_width_cents: cents - 1.0,
        ..AggregatorConfig::default()
    })
    .unwrap();
    let (map, report) = narrow.aggregate_with_report(&frame);
    assert!(map.is_empty());
    assert_eq!(report.zero_weight, 1);
}

#[test]
fn higher_noise_floor_filters_quiet_bins() {
    let mut spectrum = vec![0.0; 1024];
    spectrum[20] = 0.05;
    spectrum[41] = 0.5;
    let frame = Frame::new(spectrum, 44100.0).unwrap();

    let loose = SpectralAggregator::default().aggregate(&frame);
    let strict = SpectralAggregator::new(AggregatorConfig {
        noise_floor: 0.1,
        ..AggregatorConfig::default()
    })
    .unwrap()
    .aggregate(&frame);
    assert_eq!(loose.len(), 2);
    assert_eq!(strict.len(), 1);
}

#[test]
fn invalid_config_is_rejected() {
    assert!(SpectralAggregator::new(AggregatorConfig {
        noise_floor: -1.0,
        ..AggregatorConfig::default()
    })
    .is_err());
}

#[test]
fn map_serializes_with_note_names() {
    let frame = single_bin_frame(440, 1.0, 4000, 8000.0);
    let map = SpectralAggregator::default().aggregate(&frame);
    let json = serde_json::to_value(&map).unwrap();
    assert_eq!(json["A4"], serde_json::json!(1.0));
}
