pub mod loader;
pub mod schema;

pub use loader::{load_from_path, load_from_str, ConfigError};
pub use schema::{
    ClassPromise, DeletePromise, EditBundle, EditDefaults, FieldEditPromise, InsertPromise,
    Location, Metadata, ReplacePromise, ReportPromise, ValidationError, ValidationIssue,
    VarPromise,
};
