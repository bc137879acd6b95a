/// Canonical form used for accuracy comparison: uppercase ASCII letters,
/// digits and single spaces only.
pub fn normalize_text(s: &str) -> String {
    let upper = s.to_uppercase();
    let kept: String = upper
        .chars()
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}
