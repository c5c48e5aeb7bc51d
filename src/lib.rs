#![forbid(unsafe_code)]

//! Library behind the MovieBox front-end tools.
//!
//! `api` and `relay` route calls to the upstream catalog service, `history`
//! keeps the local "continue watching" list, and `pages` assembles what each
//! view shows. The binaries only wire these together.

pub mod api;
pub mod catalog;
pub mod config;
pub mod history;
pub mod logging;
pub mod pages;
pub mod relay;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;
