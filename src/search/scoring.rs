//! Pure BM25 math.

/// Term-frequency saturation parameter.
pub const K1: f64 = 1.2;
/// Document-length normalization parameter.
pub const B: f64 = 0.75;

/// Inverse document frequency: `ln(1 + (N − df + 0.5) / (df + 0.5))`.
///
/// Non-negative for any `df <= N`, monotone non-increasing in `df`.
#[must_use]
pub fn idf(df: usize, total_docs: usize) -> f64 {
    let n = total_docs as f64;
    let df = df as f64;
    (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
}

/// Per-term BM25 score for one document.
///
/// `tf` is the term's frequency inside the document, `dl` the document length
/// in tokens, `avgdl` the mean document length across the index.
#[must_use]
pub fn bm25(tf: u32, dl: usize, avgdl: f64, idf_term: f64) -> f64 {
    if tf == 0 {
        return 0.0;
    }
    let tf = f64::from(tf);
    let dl = dl as f64;
    idf_term * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * dl / avgdl))
}
