//! HTTP API: router, multipart upload mapping and job endpoints.

pub mod app;
