//! Field status checks invoked by `#[derive(Config)]`-generated
//! `validate_field_status` methods.

use super::FieldPath;
use crate::config::ConfigDiagnostics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldStatus {
    Experimental,
    NotImplemented,
    Deprecated,
}

/// Report a field whose value differs from its default and carries a status.
pub fn check_field_status(field_path: &str, status: FieldStatus, diag: &mut ConfigDiagnostics) {
    report(format!("{field_path}"), "field", status, diag);
}

/// Report a section with a status whose fields differ from the defaults.
pub fn check_section_status(section: &str, status: FieldStatus, diag: &mut ConfigDiagnostics) {
    report(format!("[{section}]"), "section", status, diag);
}

fn report(label: String, what: &str, status: FieldStatus, diag: &mut ConfigDiagnostics) {
    if status == FieldStatus::Experimental && diag.allow_experimental {
        return;
    }

    // Field paths are `'static` in diagnostics; status checks run once per load.
    let path = FieldPath::new(Box::leak(label.into_boxed_str()));

    match status {
        FieldStatus::NotImplemented => diag.error_with_hint(
            path,
            format!("this {what} is not implemented yet"),
            format!("remove this {what}"),
        ),
        FieldStatus::Deprecated => diag.warn(
            path,
            format!("this {what} is deprecated and will be removed in a future version"),
        ),
        FieldStatus::Experimental => diag.experimental_hint(path),
    }
}
