//! UnityWorks Server - REST backend for a community volunteering site.
//!
//! This crate provides the API behind the UnityWorks web client:
//! - Listing, creating, updating and deleting community events
//! - Joining events and communities
//! - Newsletter subscriptions
//!
//! # Architecture
//!
//! Each route maps one HTTP request onto one document-store operation.
//! Owner-only routes authenticate a Firebase ID token ([`firebase`]) and
//! compare its email claim with a caller-supplied email ([`auth`]). Storage
//! sits behind per-collection traits ([`store`]) with a MongoDB backend for
//! production and an in-memory backend for tests.

pub mod auth;
pub mod config;
pub mod error;
pub mod firebase;
pub mod models;
pub mod routes;
pub mod store;
