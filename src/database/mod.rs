//! # Database Operations
//!
//! Connection pooling and schema migrations for the PostgreSQL store.
//!
//! - [`connection`] - pool construction from [`DatabaseConfig`](crate::config::DatabaseConfig)
//! - [`migrations`] - embedded schema migrations
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use task_queue::config::DatabaseConfig;
//! use task_queue::database::DatabaseConnection;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = DatabaseConnection::connect(&DatabaseConfig::default()).await?;
//! assert!(db.health_check().await?);
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod migrations;

pub use connection::DatabaseConnection;
pub use migrations::DatabaseMigrations;
