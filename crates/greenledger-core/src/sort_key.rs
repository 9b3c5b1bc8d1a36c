//! Sort key normalisation for ESRS disclosure codes.
//!
//! Converts disclosure codes (e.g., "ESRS E2-4", "E1-10", "ESRS 2 GOV-1",
//! "S1-14") into lexicographically-sortable strings so that ordering by
//! sort key recovers the order the standards are published in.
//!
//! # ESRS numbering conventions
//!
//! - Cross-cutting standards are numeric: ESRS 1, ESRS 2 (and come first)
//! - Topical standards carry a pillar letter: E1..E5, S1..S4, G1
//! - Pillars are ordered environment, social, governance (not alphabetically)
//! - Disclosure requirements are numbered within a standard: E1-1, E1-2, ..., E1-10
//! - Cross-cutting requirements use a family prefix: GOV-1, SBM-3, IRO-1

/// Normalise a disclosure code into a lexicographically-sortable string.
///
/// Input: codes like "ESRS E2-4", "E1-10", "ESRS 2 GOV-1"
/// Output: "1E002.004", "1E001.010", "002.GOV.001"
///
/// # Algorithm
///
/// 1. Uppercase, trim, and drop a leading "ESRS" marker
/// 2. Split on separators (space, '-', '.', '_', '/', '§', parentheses)
/// 3. Each segment becomes:
///    - all digits: zero-padded to 3 digits
///    - pillar letter + digits (E2, S1, G1): pillar rank, letter, padded digits
///    - anything else: letters then padded trailing digits, if any
/// 4. Join with "."
pub fn normalize_code(s: &str) -> String {
    let upper = s.trim().to_ascii_uppercase();
    let body = upper.strip_prefix("ESRS").unwrap_or(&upper);

    let segments: Vec<String> = body
        .split(|c: char| matches!(c, ' ' | '-' | '.' | '_' | '/' | '§' | '(' | ')'))
        .filter(|seg| !seg.is_empty())
        .map(normalize_segment)
        .collect();

    if segments.is_empty() {
        return "000".to_string();
    }
    segments.join(".")
}

fn normalize_segment(seg: &str) -> String {
    let letter_end = seg
        .bytes()
        .position(|b| !b.is_ascii_alphabetic())
        .unwrap_or(seg.len());
    let (letters, rest) = seg.split_at(letter_end);

    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let padded = if digits.is_empty() {
        String::new()
    } else {
        format!("{:03}", digits.parse::<u32>().unwrap_or(0))
    };

    match letters {
        "" => padded,
        // Topical standards: environment < social < governance.
        "E" | "S" | "G" if !padded.is_empty() => {
            format!("{}{letters}{padded}", pillar_rank(letters))
        }
        _ => format!("{letters}{padded}"),
    }
}

fn pillar_rank(letter: &str) -> u8 {
    match letter {
        "E" => 1,
        "S" => 2,
        "G" => 3,
        _ => 9,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: assert a list of inputs produces sort keys in strictly ascending order.
    fn assert_sorted_order(inputs: &[&str]) {
        let keys: Vec<String> = inputs.iter().map(|s| normalize_code(s)).collect();
        for i in 1..keys.len() {
            assert!(
                keys[i - 1] < keys[i],
                "Expected {:?} ({}) < {:?} ({}), got {:?} >= {:?}",
                inputs[i - 1],
                keys[i - 1],
                inputs[i],
                keys[i],
                keys[i - 1],
                keys[i],
            );
        }
    }

    #[test]
    fn numeric_requirement_sequence() {
        assert_sorted_order(&["E1-1", "E1-2", "E1-9", "E1-10", "E1-11"]);
    }

    #[test]
    fn pillars_in_publication_order() {
        assert_sorted_order(&["ESRS E5", "ESRS S1", "ESRS S4", "ESRS G1"]);
    }

    #[test]
    fn cross_cutting_before_topical() {
        assert_sorted_order(&["ESRS 2 GOV-1", "ESRS 2 SBM-3", "ESRS E1", "ESRS E1-1"]);
    }

    #[test]
    fn standard_before_its_requirements() {
        assert_sorted_order(&["ESRS E2", "ESRS E2-1", "ESRS E2-4", "ESRS E3"]);
    }

    #[test]
    fn exact_values() {
        assert_eq!(normalize_code("ESRS E2-4"), "1E002.004");
        assert_eq!(normalize_code("E1-10"), "1E001.010");
        assert_eq!(normalize_code("ESRS 2 GOV-1"), "002.GOV.001");
        assert_eq!(normalize_code("S1-14"), "2S001.014");
        assert_eq!(normalize_code("G1"), "3G001");
    }

    #[test]
    fn prefix_is_optional() {
        assert_eq!(normalize_code("ESRS E2-4"), normalize_code("E2-4"));
    }

    #[test]
    fn empty_string() {
        assert_eq!(normalize_code(""), "000");
        assert_eq!(normalize_code("ESRS"), "000");
    }

    #[test]
    fn lowercase_normalised() {
        assert_eq!(normalize_code("esrs e2-4"), normalize_code("ESRS E2-4"));
    }

    #[test]
    fn whitespace_trimmed() {
        assert_eq!(normalize_code("  E1-6  "), normalize_code("E1-6"));
    }

    #[test]
    fn datapoint_suffix_sorts_within_requirement() {
        assert_sorted_order(&["E1-6", "E1-6.44", "E1-6.45", "E1-7"]);
    }
}
