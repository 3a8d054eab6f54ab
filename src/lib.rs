// Hour Bank - Core Library
// Exposes all modules for use in the admin CLI, API server, and tests

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;

// Re-export commonly used types
pub use api::{router, AppState};
pub use config::Config;
pub use db::{
    all_faculty, all_programs, all_students, collection_counts, create_credit_transaction,
    create_program, find_faculty_by_fid, find_student_by_roll, insert_faculty, insert_student,
    resolve_user, setup_database, transactions_for_receiver, transactions_for_sender,
    CollectionCounts, CreditTransaction, Faculty, Program, Student, UserRecord,
};
pub use error::ApiError;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
