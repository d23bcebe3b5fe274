//! Append-only evidence captured during a visit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::VisitError;
use crate::geo::GeoPosition;
use crate::state::template;
use crate::types::{ConsentParty, MediaKind};

/// A geo- and time-stamped capture attached to a visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub id: String,
    pub captured_at: DateTime<Utc>,
    pub location: GeoPosition,
    pub captured_by: String,
    #[serde(flatten)]
    pub payload: EvidencePayload,
}

/// Variant-specific evidence content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidencePayload {
    MediaCapture {
        media: MediaKind,
        size_bytes: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_seconds: Option<u32>,
        /// Opaque key into external blob storage.
        reference: String,
    },
    ProductInputRecord {
        product_name: String,
        quantity: f64,
        unit: String,
        purpose: String,
    },
    ConsentCapture {
        party: ConsentParty,
        name: String,
        phone: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        village: Option<String>,
        consent_given: bool,
    },
    SignatureCapture {
        signer_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signer_role: Option<String>,
        reference: String,
    },
}

impl EvidencePayload {
    pub fn validate(&self) -> Result<(), VisitError> {
        match self {
            EvidencePayload::MediaCapture {
                media,
                size_bytes,
                duration_seconds,
                reference,
            } => {
                if *size_bytes == 0 {
                    return Err(invalid("media capture is empty"));
                }
                if reference.trim().is_empty() {
                    return Err(invalid("media capture has no storage reference"));
                }
                if *media == MediaKind::Video && duration_seconds.unwrap_or(0) == 0 {
                    return Err(invalid("video capture requires a duration"));
                }
            }
            EvidencePayload::ProductInputRecord {
                product_name,
                quantity,
                unit,
                purpose,
            } => {
                if product_name.trim().is_empty() {
                    return Err(invalid("product name is required"));
                }
                if !quantity.is_finite() || *quantity <= 0.0 {
                    return Err(invalid(&format!("product quantity {quantity} must be positive")));
                }
                if unit.trim().is_empty() || purpose.trim().is_empty() {
                    return Err(invalid("product unit and purpose are required"));
                }
            }
            EvidencePayload::ConsentCapture {
                name,
                phone,
                consent_given,
                ..
            } => {
                if name.trim().is_empty() {
                    return Err(invalid("consenting party name is required"));
                }
                let digits = phone.chars().filter(char::is_ascii_digit).count();
                if digits < 7 {
                    return Err(invalid(&format!("phone '{phone}' has too few digits")));
                }
                if !consent_given {
                    return Err(invalid("consent was not given"));
                }
            }
            EvidencePayload::SignatureCapture {
                signer_name,
                reference,
                ..
            } => {
                if signer_name.trim().is_empty() {
                    return Err(invalid("signer name is required"));
                }
                if reference.trim().is_empty() {
                    return Err(invalid("signature has no storage reference"));
                }
            }
        }
        Ok(())
    }

    /// Checklist template this kind of evidence satisfies.
    pub fn template_id(&self) -> &'static str {
        match self {
            EvidencePayload::MediaCapture {
                media: MediaKind::Photo,
                ..
            } => template::DEMONSTRATION,
            EvidencePayload::MediaCapture {
                media: MediaKind::Video,
                ..
            } => template::VIDEO_VERIFICATION,
            EvidencePayload::ProductInputRecord { .. } => template::PRODUCT_INPUT,
            EvidencePayload::ConsentCapture { .. } => template::DATABASE_CONSENT,
            EvidencePayload::SignatureCapture { .. } => template::SIGNATURE,
        }
    }
}

fn invalid(msg: &str) -> VisitError {
    VisitError::InvalidEvidence(msg.to_string())
}

/// Ordered, append-only collection of evidence records.
///
/// Records are never removed or handed out mutably.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceLedger {
    records: Vec<EvidenceRecord>,
}

impl EvidenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and append a record.
    pub fn append(&mut self, record: EvidenceRecord) -> Result<&EvidenceRecord, VisitError> {
        Self::check(&record)?;
        if self.records.iter().any(|r| r.id == record.id) {
            return Err(invalid(&format!("duplicate evidence id {}", record.id)));
        }
        self.records.push(record);
        let idx = self.records.len() - 1;
        Ok(&self.records[idx])
    }

    /// Validation applied by `append`, usable before committing other changes.
    pub fn check(record: &EvidenceRecord) -> Result<(), VisitError> {
        if record.id.trim().is_empty() {
            return Err(invalid("evidence id is required"));
        }
        if record.captured_by.trim().is_empty() {
            return Err(invalid("evidence must be attributed"));
        }
        if !record.location.is_valid() {
            return Err(invalid("evidence location is not a valid coordinate"));
        }
        record.payload.validate()
    }

    pub fn get(&self, id: &str) -> Option<&EvidenceRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EvidenceRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
