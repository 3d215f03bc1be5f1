use serde::{Deserialize, Serialize};

/// Threshold used when none is configured.
pub const DEFAULT_THRESHOLD: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateDecision {
    pub percentage: u32,
    pub threshold: u8,
    pub eligible: bool,
}

/// round(100 * score / gradable_count), or 0 when nothing is gradable.
pub fn percentage(score: i32, gradable_count: i32) -> u32 {
    if gradable_count <= 0 || score <= 0 {
        return 0;
    }
    (100.0 * f64::from(score) / f64::from(gradable_count)).round() as u32
}

/// Derived on every read and never persisted, so a threshold change
/// reclassifies old attempts.
pub fn decide(score: i32, gradable_count: i32, threshold: u8) -> CertificateDecision {
    let percentage = percentage(score, gradable_count);
    CertificateDecision {
        percentage,
        threshold,
        eligible: percentage >= u32::from(threshold),
    }
}
