//! # Error Types
//!
//! Errors shared by the framework and the policies built on it.

use core::fmt;

use crate::InstanceId;

/// Result type for framework and policy operations
pub type DimeResult<T> = Result<T, DimeError>;

/// Framework and policy errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimeError {
    /// A page record could not be allocated
    OutOfMemory,
    /// Every eviction tier failed for the configured number of passes
    VictimExhausted {
        /// Instance that could not produce a victim
        instance: InstanceId,
        /// Number of full passes attempted
        attempts: u32,
    },
    /// A fault was routed while no policy is registered
    NoPolicy,
    /// A policy is already registered
    PolicyAlreadyRegistered,
    /// The named policy is not the registered one
    PolicyNotRegistered,
    /// No instance with this id
    InstanceNotFound(InstanceId),
    /// A configuration value is out of range
    InvalidConfig(&'static str),
    /// The background reclaimer thread could not be started
    ThreadSpawn,
}

impl DimeError {
    /// Returns a short human readable description
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OutOfMemory => "out of memory for page records",
            Self::VictimExhausted { .. } => "no eviction victim available",
            Self::NoPolicy => "no page replacement policy registered",
            Self::PolicyAlreadyRegistered => "a page replacement policy is already registered",
            Self::PolicyNotRegistered => "policy is not registered",
            Self::InstanceNotFound(_) => "instance not found",
            Self::InvalidConfig(_) => "invalid configuration",
            Self::ThreadSpawn => "failed to spawn reclaimer thread",
        }
    }
}

impl fmt::Display for DimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VictimExhausted { instance, attempts } => {
                write!(f, "{} (instance {}, {} passes)", self.as_str(), instance, attempts)
            },
            Self::InstanceNotFound(id) => write!(f, "{}: {}", self.as_str(), id),
            Self::InvalidConfig(what) => write!(f, "{}: {}", self.as_str(), what),
            _ => f.write_str(self.as_str()),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DimeError {}
