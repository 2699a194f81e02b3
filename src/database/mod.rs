//! # Database Layer
//!
//! The seam between the batching core and the database that holds the rows
//! being migrated.
//!
//! ## Key Components
//!
//! - [`connection`] - The [`Connection`] trait and its sqlx-backed
//!   [`PostgresConnection`] implementation
//! - [`shared`] - [`SharedConnection`], a scoped "current connection" slot
//!   that is passed explicitly rather than living in global state

pub mod connection;
pub mod shared;

pub use connection::{Connection, PostgresConnection, Row};
pub use shared::{SharedConnection, SharedConnectionGuard};
