//! Error types for benchmark runs.
//!
//! Every failure is detected close to its source and carries enough context (operation,
//! size, OS error code, thread index) to diagnose a run from its printed output alone.

use std::fmt;

/// Errors that can occur while provisioning, launching or joining a benchmark run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BenchError {
    /// Heap allocation failed.
    AllocationError {
        /// The size that was requested to be allocated.
        requested_size: usize,
        /// The alignment that was requested.
        requested_alignment: usize,
        /// Human-readable error message.
        message: String,
    },
    /// Invalid layout parameters were provided.
    LayoutError {
        /// The size parameter that caused the error.
        size: usize,
        /// The alignment parameter that caused the error.
        alignment: usize,
        /// Human-readable error message.
        message: String,
    },
    /// An anonymous or huge-page mapping could not be created.
    MappingError {
        /// Length of the requested mapping in bytes.
        size: usize,
        /// Requested fixed address, if any.
        address: Option<usize>,
        /// OS error code (`errno`).
        code: i32,
        /// Human-readable error message.
        message: String,
    },
    /// The calling thread could not be pinned to its core.
    AffinityError {
        /// Target core index.
        core: usize,
        /// OS error code (`errno`).
        code: i32,
    },
    /// The OS refused to create a worker thread.
    SpawnError {
        /// Index of the thread that failed to start.
        thread: usize,
        /// Human-readable error message.
        message: String,
    },
    /// Joining a worker thread reported a failure.
    JoinError {
        /// Index of the thread whose join failed.
        thread: usize,
        /// Human-readable error message.
        message: String,
    },
    /// The run configuration is inconsistent.
    ConfigError {
        /// Human-readable error message.
        message: String,
    },
}

impl BenchError {
    /// Whether this error ends the whole run rather than a single thread.
    ///
    /// An unpinned thread invalidates only its own measurement, so affinity failures stay
    /// local to that thread. Everything else leaves the run without a trustworthy setup.
    pub fn is_fatal_to_run(&self) -> bool {
        !matches!(self, BenchError::AffinityError { .. })
    }

    /// Name of the operation that failed, for error reports.
    pub fn operation(&self) -> &'static str {
        match self {
            BenchError::AllocationError { .. }
            | BenchError::LayoutError { .. }
            | BenchError::MappingError { .. } => "provision()",
            BenchError::AffinityError { .. } => "sched_setaffinity()",
            BenchError::SpawnError { .. } => "spawn()",
            BenchError::JoinError { .. } => "join()",
            BenchError::ConfigError { .. } => "configure()",
        }
    }
}

impl fmt::Display for BenchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BenchError::AllocationError {
                requested_size,
                requested_alignment,
                message,
            } => write!(
                f,
                "Memory allocation failed: {} (requested {} bytes with {} byte alignment)",
                message, requested_size, requested_alignment
            ),
            BenchError::LayoutError {
                size,
                alignment,
                message,
            } => write!(
                f,
                "Invalid memory layout: {} (size: {}, alignment: {})",
                message, size, alignment
            ),
            BenchError::MappingError {
                size,
                address,
                code,
                message,
            } => match address {
                Some(address) => write!(
                    f,
                    "Memory mapping failed: {} (size: {}, address: {:#x}, error code: {})",
                    message, size, address, code
                ),
                None => write!(
                    f,
                    "Memory mapping failed: {} (size: {}, error code: {})",
                    message, size, code
                ),
            },
            BenchError::AffinityError { core, code } => {
                write!(f, "Failed to pin thread to core {}: error code {}", core, code)
            }
            BenchError::SpawnError { thread, message } => {
                write!(f, "Failed to spawn thread {}: {}", thread, message)
            }
            BenchError::JoinError { thread, message } => {
                write!(f, "Failed to join thread {}: {}", thread, message)
            }
            BenchError::ConfigError { message } => {
                write!(f, "Invalid configuration: {}", message)
            }
        }
    }
}

impl std::error::Error for BenchError {}

/// Result type alias for benchmark operations.
pub type Result<T> = std::result::Result<T, BenchError>;

/// Creates an allocation error.
pub fn allocation_error(size: usize, alignment: usize, message: impl Into<String>) -> BenchError {
    BenchError::AllocationError {
        requested_size: size,
        requested_alignment: alignment,
        message: message.into(),
    }
}

/// Creates a layout error.
pub fn layout_error(size: usize, alignment: usize, message: impl Into<String>) -> BenchError {
    BenchError::LayoutError {
        size,
        alignment,
        message: message.into(),
    }
}

/// Creates a mapping error from an OS error.
pub fn mapping_error(size: usize, address: Option<usize>, err: std::io::Error) -> BenchError {
    BenchError::MappingError {
        size,
        address,
        code: err.raw_os_error().unwrap_or(0),
        message: err.to_string(),
    }
}

/// Creates an affinity error from an OS error.
pub fn affinity_error(core: usize, err: std::io::Error) -> BenchError {
    BenchError::AffinityError {
        core,
        code: err.raw_os_error().unwrap_or(0),
    }
}

/// Creates a spawn error.
pub fn spawn_error(thread: usize, message: impl Into<String>) -> BenchError {
    BenchError::SpawnError {
        thread,
        message: message.into(),
    }
}

/// Creates a join error.
pub fn join_error(thread: usize, message: impl Into<String>) -> BenchError {
    BenchError::JoinError {
        thread,
        message: message.into(),
    }
}

/// Creates a configuration error.
pub fn config_error(message: impl Into<String>) -> BenchError {
    BenchError::ConfigError {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_error_display() {
        let error = allocation_error(1024, 64, "out of memory");
        let display = format!("{}", error);
        assert!(display.contains("Memory allocation failed"));
        assert!(display.contains("1024 bytes"));
        assert!(display.contains("64 byte alignment"));
        assert!(display.contains("out of memory"));
    }

    #[test]
    fn test_mapping_error_display() {
        let error = mapping_error(
            2 << 20,
            Some(0x4000_0000_0000),
            std::io::Error::from_raw_os_error(libc::ENOMEM),
        );
        let display = format!("{}", error);
        assert!(display.contains("Memory mapping failed"));
        assert!(display.contains("0x400000000000"));
        assert!(display.contains(&format!("error code: {}", libc::ENOMEM)));

        let anonymous = mapping_error(4096, None, std::io::Error::from_raw_os_error(libc::EINVAL));
        assert!(!format!("{}", anonymous).contains("address"));
    }

    #[test]
    fn test_affinity_error_display() {
        let error = affinity_error(7, std::io::Error::from_raw_os_error(libc::EINVAL));
        let display = format!("{}", error);
        assert!(display.contains("core 7"));
        assert!(display.contains(&format!("error code {}", libc::EINVAL)));
    }

    #[test]
    fn test_join_error_mentions_thread() {
        let error = join_error(2, "worker panicked");
        assert_eq!(format!("{}", error), "Failed to join thread 2: worker panicked");
    }

    #[test]
    fn test_fatality_classification() {
        assert!(!affinity_error(0, std::io::Error::from_raw_os_error(libc::EINVAL)).is_fatal_to_run());
        assert!(allocation_error(1, 64, "x").is_fatal_to_run());
        assert!(join_error(0, "x").is_fatal_to_run());
        assert!(config_error("x").is_fatal_to_run());
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(allocation_error(1, 64, "x").operation(), "provision()");
        assert_eq!(
            mapping_error(1, None, std::io::Error::from_raw_os_error(libc::ENOMEM)).operation(),
            "provision()"
        );
        assert_eq!(join_error(2, "x").operation(), "join()");
        assert_eq!(spawn_error(2, "x").operation(), "spawn()");
    }

    #[test]
    fn test_error_equality() {
        let error1 = allocation_error(1024, 64, "test");
        let error2 = allocation_error(1024, 64, "test");
        let error3 = allocation_error(2048, 64, "test");

        assert_eq!(error1, error2);
        assert_ne!(error1, error3);
    }

    #[test]
    fn test_error_trait_implementation() {
        let error = config_error("zero threads");
        let _: &dyn std::error::Error = &error;
        assert!(std::error::Error::source(&error).is_none());
    }
}
