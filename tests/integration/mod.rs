//! Integration tests: edit bundles applied to real files through the
//! session lifecycle.

mod golden;
mod sessions;
