pub mod models;
pub mod pg_repository;
pub mod proposal;
pub mod repositories;
