//! Turning detector output into a door label.

use anyhow::{Context, Result};

use crate::detect::{DigitBox, InferenceOracle, PlateClass, ZERO_CLASS};
use crate::extract::Candidate;

/// Outcome for one candidate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InferenceResult {
    Noise,
    Label(String),
    Unknown,
}

/// Character for a detector class: `ZERO_CLASS` renders as `'0'`, classes
/// 0..=9 as their digit, anything else is not a glyph.
pub fn digit_char(class: u8) -> Option<char> {
    match class {
        ZERO_CLASS => Some('0'),
        0..=9 => char::from_digit(u32::from(class), 10),
        _ => None,
    }
}

/// Three characters are concatenated, four become `abc-d`, any other count is
/// concatenated as is.
pub fn assemble_label(chars: &[char]) -> String {
    match chars {
        [a, b, c, d] => format!("{}{}{}-{}", a, b, c, d),
        _ => chars.iter().collect(),
    }
}

/// Sort glyphs into reading order (stable on ties) and assemble the label.
/// No usable glyph means `Unknown`.
pub fn decode_detections(mut boxes: Vec<DigitBox>) -> InferenceResult {
    boxes.sort_by(|a, b| a.x1.total_cmp(&b.x1));
    let chars: Vec<char> = boxes.iter().filter_map(|b| digit_char(b.class)).collect();
    if chars.is_empty() {
        InferenceResult::Unknown
    } else {
        InferenceResult::Label(assemble_label(&chars))
    }
}

/// Run both stages for one candidate. Stage B is skipped for noise.
pub fn label_candidate(
    oracle: &mut InferenceOracle,
    candidate: &Candidate,
) -> Result<(PlateClass, InferenceResult)> {
    let class = oracle
        .classify_noise(&candidate.tight)
        .context("noise classifier")?;
    if class == PlateClass::Noise {
        return Ok((class, InferenceResult::Noise));
    }
    let boxes = oracle
        .detect_digits(&candidate.context)
        .context("digit detector")?;
    Ok((class, decode_detections(boxes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(classes: &[u8]) -> InferenceResult {
        decode_detections(crate::detect::boxes_for_classes(classes))
    }

    #[test]
    fn assembles_three_and_four_digit_labels() {
        assert_eq!(labels(&[1, 0, 3]), InferenceResult::Label("103".into()));
        assert_eq!(labels(&[1, 0, 3, 5]), InferenceResult::Label("103-5".into()));
    }

    #[test]
    fn class_ten_renders_as_zero() {
        assert_eq!(labels(&[10, 2, 3]), InferenceResult::Label("023".into()));
        assert_eq!(labels(&[2, 10, 10, 1]), InferenceResult::Label("200-1".into()));
    }

    #[test]
    fn other_counts_are_concatenated() {
        assert_eq!(labels(&[7]), InferenceResult::Label("7".into()));
        assert_eq!(labels(&[1, 2, 3, 4, 5]), InferenceResult::Label("12345".into()));
    }

    #[test]
    fn no_detections_is_unknown() {
        assert_eq!(decode_detections(Vec::new()), InferenceResult::Unknown);
        assert_eq!(labels(&[42]), InferenceResult::Unknown);
    }

    #[test]
    fn sorts_left_to_right_with_stable_ties() {
        let boxes = vec![
            DigitBox::new(30.0, 0.0, 40.0, 10.0, 3, 0.9),
            DigitBox::new(5.0, 0.0, 15.0, 10.0, 1, 0.9),
            DigitBox::new(18.0, 0.0, 28.0, 10.0, 2, 0.9),
            DigitBox::new(18.0, 0.0, 28.0, 10.0, 8, 0.9),
        ];
        assert_eq!(
            decode_detections(boxes),
            InferenceResult::Label("128-3".into())
        );
    }

    #[test]
    fn invalid_classes_are_skipped() {
        assert_eq!(labels(&[1, 11, 2, 3]), InferenceResult::Label("123".into()));
    }
}
