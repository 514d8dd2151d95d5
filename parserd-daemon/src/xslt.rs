use std::path::{Path, PathBuf};
use std::process::Command;

use parserd::error::{ParserdError, ParserdResult};
use parserd::transform::{ReportTransform, TransformError};
use parserd::types::{ParseJob, ReportRow, TransformedReport};

const XMLPARSER_XSL: &str = "xmlparser.xsl";

/// Transforms submission payloads by running `xsltproc` with the shared
/// `xmlparser.xsl` stylesheet.
///
/// The stylesheet path is resolved and checked once at startup; the handle is
/// then shared read-only across all workers. The stylesheet emits one record
/// per line, `table|column=value|column=value|...`, which is parsed into the
/// report rows here.
pub struct XsltTransformer {
    stylesheet: PathBuf,
}

impl XsltTransformer {
    /// Resolves the stylesheet under `xsltpath` and verifies it exists.
    pub fn new(xsltpath: &Path) -> ParserdResult<Self> {
        let stylesheet = xsltpath.join(XMLPARSER_XSL);
        if !stylesheet.is_file() {
            return Err(ParserdError::configuration(
                "xsltpath",
                format!("stylesheet {} does not exist", stylesheet.display()),
            ));
        }
        Ok(Self { stylesheet })
    }

    pub fn stylesheet(&self) -> &Path {
        &self.stylesheet
    }
}

impl ReportTransform for XsltTransformer {
    fn transform(&self, job: &ParseJob) -> Result<TransformedReport, TransformError> {
        if !job.payload_path.is_file() {
            return Err(TransformError::transient(format!(
                "payload {} is not readable",
                job.payload_path.display()
            )));
        }

        let output = Command::new("xsltproc")
            .arg(&self.stylesheet)
            .arg(&job.payload_path)
            .output()
            .map_err(|err| TransformError::transient(format!("could not run xsltproc: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransformError::structural(format!(
                "xsltproc failed on {}: {}",
                job.payload_path.display(),
                stderr.trim()
            )));
        }

        let document = String::from_utf8_lossy(&output.stdout).into_owned();
        let rows = parse_rows(&document)?;
        Ok(TransformedReport { document, rows })
    }
}

/// Parses the stylesheet's line-oriented record output into report rows.
fn parse_rows(document: &str) -> Result<Vec<ReportRow>, TransformError> {
    let mut rows = Vec::new();

    for line in document.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split('|');
        let table = fields
            .next()
            .filter(|table| !table.is_empty())
            .ok_or_else(|| {
                TransformError::structural(format!("record without a table name: `{line}`"))
            })?;

        let mut values = Vec::new();
        for field in fields {
            let (column, value) = field.split_once('=').ok_or_else(|| {
                TransformError::structural(format!(
                    "malformed field `{field}` in record for table `{table}`"
                ))
            })?;
            values.push((column.to_string(), value.to_string()));
        }

        if values.is_empty() {
            return Err(TransformError::structural(format!(
                "record for table `{table}` carries no values"
            )));
        }

        rows.push(ReportRow {
            table: table.to_string(),
            values,
        });
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn missing_stylesheet_is_a_configuration_error() {
        let dir = TempDir::new().unwrap();
        assert!(XsltTransformer::new(dir.path()).is_err());
    }

    #[test]
    fn stylesheet_is_resolved_under_xsltpath() {
        let dir = TempDir::new().unwrap();
        let stylesheet = dir.path().join(XMLPARSER_XSL);
        fs::write(&stylesheet, "<xsl:stylesheet/>").unwrap();

        let transformer = XsltTransformer::new(dir.path()).unwrap();
        assert_eq!(transformer.stylesheet(), stylesheet);
    }

    #[test]
    fn parses_record_lines_into_rows() {
        let rows = parse_rows(
            "report_summary|submid=7|clientid=client-a\nreport_cpu|submid=7|core=0|load=0.42\n",
        )
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].table, "report_summary");
        assert_eq!(
            rows[0].values,
            vec![
                ("submid".to_string(), "7".to_string()),
                ("clientid".to_string(), "client-a".to_string()),
            ]
        );
        assert_eq!(rows[1].table, "report_cpu");
        assert_eq!(rows[1].values.len(), 3);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let rows = parse_rows("\n\nreport_summary|submid=1\n\n").unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn malformed_records_are_structural_failures() {
        assert!(parse_rows("|submid=7").unwrap_err().is_structural());
        assert!(parse_rows("report_summary|no-equals-sign")
            .unwrap_err()
            .is_structural());
        assert!(parse_rows("report_summary").unwrap_err().is_structural());
    }
}
