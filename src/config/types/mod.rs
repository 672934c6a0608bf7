//! Configuration utility types.
//!
//! | Module   | Purpose                                 |
//! |----------|-----------------------------------------|
//! | `error`  | `ConfigError` and collected diagnostics |
//! | `field`  | Field paths for diagnostics             |
//! | `status` | Field status validation                 |

mod error;
mod field;
mod status;

pub use error::{ConfigDiagnostic, ConfigDiagnostics, ConfigError};
pub use field::FieldPath;
pub use status::{FieldStatus, check_field_status, check_section_status};
