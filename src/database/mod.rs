/*!
 * Database module for persistent storage.
 *
 * This module provides SQLite-based persistence for:
 * - The chapter store (books and chapters with cached segmentation)
 * - Per-(content, language) translation records
 * - Translation jobs and their tasks
 * - Monthly budget periods
 */

pub mod schema;
pub mod connection;
pub mod repository;
pub mod models;

// Re-export main types
pub use connection::DatabaseConnection;
pub use repository::Repository;
