//! Trivy Operator report kinds
//!
//! Only the five namespaced report CRDs below can be watched. The configured
//! list is validated at startup; an unknown entry is a fatal configuration
//! error because it would register a watch for a kind that does not exist.

use std::fmt;
use std::str::FromStr;

use kube::discovery::ApiResource;

use crate::{Error, TRIVY_API_GROUP, TRIVY_API_VERSION};

/// A Trivy Operator report kind that can be forwarded to DefectDojo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    /// `configauditreports`
    ConfigAudit,
    /// `vulnerabilityreports`
    Vulnerability,
    /// `exposedsecretreports`
    ExposedSecret,
    /// `infraassessmentreports`
    InfraAssessment,
    /// `rbacassessmentreports`
    RbacAssessment,
}

impl ReportKind {
    /// Every allowed report kind
    pub const ALL: [ReportKind; 5] = [
        ReportKind::ConfigAudit,
        ReportKind::Vulnerability,
        ReportKind::ExposedSecret,
        ReportKind::InfraAssessment,
        ReportKind::RbacAssessment,
    ];

    /// Plural resource name, as used in `REPORTS`
    pub fn plural(&self) -> &'static str {
        match self {
            Self::ConfigAudit => "configauditreports",
            Self::Vulnerability => "vulnerabilityreports",
            Self::ExposedSecret => "exposedsecretreports",
            Self::InfraAssessment => "infraassessmentreports",
            Self::RbacAssessment => "rbacassessmentreports",
        }
    }

    /// CRD kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigAudit => "ConfigAuditReport",
            Self::Vulnerability => "VulnerabilityReport",
            Self::ExposedSecret => "ExposedSecretReport",
            Self::InfraAssessment => "InfraAssessmentReport",
            Self::RbacAssessment => "RbacAssessmentReport",
        }
    }

    /// `apiVersion` of the CRD
    pub fn api_version() -> String {
        format!("{}/{}", TRIVY_API_GROUP, TRIVY_API_VERSION)
    }

    /// Build the ApiResource used to watch this kind as a `DynamicObject`
    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: TRIVY_API_GROUP.to_string(),
            version: TRIVY_API_VERSION.to_string(),
            api_version: Self::api_version(),
            kind: self.kind().to_string(),
            plural: self.plural().to_string(),
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

impl FromStr for ReportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.plural() == name)
            .ok_or_else(|| {
                Error::config_for(
                    "REPORTS",
                    format!(
                        "invalid report type: {}. Allowed reports: {}",
                        name,
                        allowed_reports()
                    ),
                )
            })
    }
}

/// Comma-separated list of allowed report names, for error messages
pub fn allowed_reports() -> String {
    ReportKind::ALL
        .iter()
        .map(ReportKind::plural)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validate the configured report names against the allow-list.
///
/// Every entry must name an allowed kind; the first unknown entry fails the
/// whole list. Duplicates are collapsed so a kind is never watched twice.
pub fn validate_reports<S: AsRef<str>>(reports: &[S]) -> Result<Vec<ReportKind>, Error> {
    if reports.is_empty() {
        return Err(Error::config_for("REPORTS", "no report kinds configured"));
    }

    let mut kinds = Vec::with_capacity(reports.len());
    for report in reports {
        let kind: ReportKind = report.as_ref().parse()?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}
