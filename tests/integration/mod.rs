//! Integration tests for session save, load and supervision

mod interactive_mode;
mod legacy_documents;
mod load_save;
mod staging;
mod support;
mod tag_lifecycle;
