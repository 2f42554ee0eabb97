//! Purpose: Define the public Rust API boundary for obmkit.
//! Exports: Core types and operations needed by the CLI, the server, and tests.
//! Role: Public, additive-only surface; hides internal module layout.
//! Invariants: This module is the only public path to core operations.

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::backup::{
    InnerDecodePolicy, NormalizeOptions, NormalizeReport, NormalizedBackup, decode_inner,
    decode_outer, default_output_path, normalize_file, normalize_line, render_pretty,
};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::extract::{
    ExtractOptions, ExtractReport, ExtractedTable, FileExtract, decode_servers, extract_file,
    extract_path, observation_tables, project_observations, unsynced_measurements,
};
pub use crate::core::flatten::{cell_text, flatten, scalar_text};
pub use crate::core::form::{
    FlattenedRow, FormFlattenOptions, FormFlattenReport, WrittenRow, flatten_form_file,
    flatten_form_records, flatten_record, render_row_csv, row_file_name,
};
pub use crate::core::geometry::{geometry_to_wkt, is_point_wkt, normalize_geometry};
pub use crate::core::secret_store::{SecretStore, generate_key, sanitize_key};
pub use crate::core::table::Table;
