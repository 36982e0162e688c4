#![allow(clippy::too_many_arguments)]
#![allow(clippy::result_large_err)]

pub mod admin;
pub mod cache;
pub mod error;
pub mod mcp;
pub mod odoo;
pub mod ops;
pub mod registry;
