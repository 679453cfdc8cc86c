use serde::Serialize;

/// Closed set of violation categories a validation run can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ViolationType {
    MissingFile,
    MissingMarkerFile,
    StructureViolation,
    CountMismatch,
    SizeMismatch,
    ChecksumMismatch,
    OrphanedAttachment,
    InvalidFormat,
    ExtraFile,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::MissingFile => "missing_file",
            ViolationType::MissingMarkerFile => "missing_marker_file",
            ViolationType::StructureViolation => "structure_violation",
            ViolationType::CountMismatch => "count_mismatch",
            ViolationType::SizeMismatch => "size_mismatch",
            ViolationType::ChecksumMismatch => "checksum_mismatch",
            ViolationType::OrphanedAttachment => "orphaned_attachment",
            ViolationType::InvalidFormat => "invalid_format",
            ViolationType::ExtraFile => "extra_file",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Error,
    Warning,
}

/// One finding against one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    pub file: String,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

impl Violation {
    pub fn error(
        violation_type: ViolationType,
        file: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            violation_type,
            file: file.into(),
            severity: Severity::Error,
            message: message.into(),
            expected: None,
            actual: None,
        }
    }

    pub fn warning(
        violation_type: ViolationType,
        file: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(violation_type, file, message)
        }
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn with_actual(mut self, actual: impl Into<String>) -> Self {
        self.actual = Some(actual.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RepoStatus {
    Valid,
    Invalid,
}

/// Everything a validation run found. `Invalid` means at least one
/// error-severity violation; warnings alone leave the repository valid.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub status: RepoStatus,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn from_violations(violations: Vec<Violation>) -> Self {
        let status = if violations
            .iter()
            .any(|violation| violation.severity == Severity::Error)
        {
            RepoStatus::Invalid
        } else {
            RepoStatus::Valid
        };
        Self { status, violations }
    }

    pub fn is_valid(&self) -> bool {
        self.status == RepoStatus::Valid
    }

    pub fn error_count(&self) -> usize {
        self.violations
            .iter()
            .filter(|violation| violation.severity == Severity::Error)
            .count()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|violation| violation.severity == Severity::Warning)
    }
}
