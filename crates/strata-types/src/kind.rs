//! Cache kinds.

use crate::error::CacheError;

/// Table organization of an artifact, stored in the header.
///
/// `Map` is a legacy in-memory kind that is decoded for completeness but
/// never emitted and rejected at load. The two dedup kinds share one
/// implementation; both carry a duplicate-value pool trailer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CacheKind {
    None = 0,
    Map = 1,
    BucketChain = 2,
    LinearProbe = 3,
    LinearProbeDedup = 4,
    LinearProbeDedupTyped = 5,
}

impl CacheKind {
    /// True for the kinds laid out as an open-addressed linear-probe table.
    pub fn is_linear(self) -> bool {
        matches!(
            self,
            CacheKind::LinearProbe | CacheKind::LinearProbeDedup | CacheKind::LinearProbeDedupTyped
        )
    }

    /// True for the kinds carrying a duplicate-value pool trailer.
    pub fn is_dedup(self) -> bool {
        matches!(
            self,
            CacheKind::LinearProbeDedup | CacheKind::LinearProbeDedupTyped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CacheKind::None => "NONE",
            CacheKind::Map => "MAP",
            CacheKind::BucketChain => "BUCKET_CHAIN",
            CacheKind::LinearProbe => "LINEAR_PROBE",
            CacheKind::LinearProbeDedup => "LINEAR_PROBE_DEDUP",
            CacheKind::LinearProbeDedupTyped => "LINEAR_PROBE_DEDUP_TYPED",
        }
    }
}

impl Default for CacheKind {
    fn default() -> Self {
        CacheKind::LinearProbeDedupTyped
    }
}

impl std::fmt::Display for CacheKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u16> for CacheKind {
    type Error = CacheError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CacheKind::None),
            1 => Ok(CacheKind::Map),
            2 => Ok(CacheKind::BucketChain),
            3 => Ok(CacheKind::LinearProbe),
            4 => Ok(CacheKind::LinearProbeDedup),
            5 => Ok(CacheKind::LinearProbeDedupTyped),
            other => Err(CacheError::decode(format!("unknown cache kind {other}"))),
        }
    }
}
