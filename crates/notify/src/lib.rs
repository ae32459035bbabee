//! Report mail delivery.
//!
//! This crate provides:
//! - `ReportMailer` trait consumed by job execution
//! - SMTP `EmailNotifier` and a logging-only `LogMailer`
//! - Minijinja rendering of report subjects and bodies

pub mod email;
pub mod templating;
pub mod traits;

pub use email::EmailNotifier;
pub use templating::{RenderedMail, TemplateRenderer};
pub use traits::{LogMailer, NotifyError, ReportMailer};
