//! Certificate statuses recorded per pivot.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::CertificateToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificatePivotStatus {
    /// Trusted before this pivot and still announced by it.
    StillTrusted,
    /// First announced by this pivot.
    Added,
    /// Trusted before this pivot and no longer announced; terminal.
    Withdrawn,
}

impl CertificatePivotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificatePivotStatus::StillTrusted => "STILL_TRUSTED",
            CertificatePivotStatus::Added => "ADDED",
            CertificatePivotStatus::Withdrawn => "WITHDRAWN",
        }
    }

    /// Whether the certificate is part of the announced set after this pivot.
    pub fn is_trusted_after(&self) -> bool {
        !matches!(self, CertificatePivotStatus::Withdrawn)
    }
}

impl fmt::Display for CertificatePivotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotCertificateEntry {
    pub certificate: CertificateToken,
    pub status: CertificatePivotStatus,
}
