//! Request pipeline middleware: CORS, response hardening and admission.

pub mod admission;
pub mod cors;
pub mod headers;
