/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Transactional retries on a hot document ran out.
    #[error("conflict on {key} after {attempts} attempts")]
    Conflict { key: String, attempts: u32 },
    #[error("unavailable: {0}")]
    Unavailable(String),
}

pub type FeedResult<T> = std::result::Result<T, FeedError>;

impl FeedError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn forbidden(what: impl Into<String>) -> Self {
        Self::Forbidden(what.into())
    }

    pub fn invalid(what: impl Into<String>) -> Self {
        Self::InvalidArgument(what.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Conflict { .. } => "conflict",
            Self::Unavailable(_) => "unavailable",
        }
    }

    /// Whether the caller may reasonably try the same request again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Unavailable(_))
    }
}

impl From<anyhow::Error> for FeedError {
    fn from(e: anyhow::Error) -> Self {
        Self::Unavailable(format!("{e:#}"))
    }
}
