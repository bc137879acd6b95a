use ocrmode_core::normalize_text;

/// Edit distance over `char`s (insert, delete, substitute all cost 1).
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();
    let (m, n) = (a.len(), b.len());

    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }

    // Keep the shorter string in the inner loop to minimise allocation.
    let (a, b, m, n) = if m <= n { (a, b, m, n) } else { (b, a, n, m) };

    let mut prev: Vec<usize> = (0..=m).collect();
    let mut curr = vec![0usize; m + 1];

    for j in 1..=n {
        curr[0] = j;
        for i in 1..=m {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[i] = (prev[i] + 1).min(curr[i - 1] + 1).min(prev[i - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[m]
}

/// Character accuracy of `prediction` against `ground_truth`, in `[0, 1]`.
///
/// Both texts are normalized first. Two empty texts match perfectly.
pub fn char_accuracy(ground_truth: &str, prediction: &str) -> f64 {
    let gt = normalize_text(ground_truth);
    let pred = normalize_text(prediction);
    let longest = gt.chars().count().max(pred.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(&gt, &pred) as f64 / longest as f64
}
