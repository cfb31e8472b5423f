//! Credential validation for Mini App requests.
//!
//! The only identity provider is Telegram: the Mini App hands the client a
//! signed `initData` string, the client forwards it on every request, and
//! this crate checks the signature against the bot token before anything
//! trusts the embedded user id.

pub mod init_data;
