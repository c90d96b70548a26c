//! # Process Limits

/// Maximum number of processes alive (running or zombie) at the same time.
pub const PROCESS_MAX_PROCESSES: usize = 32;

/// Maximum length of an executable name in bytes, excluding the terminator.
pub const MAX_FILE_NAME: usize = 32;

const _: () = {
    assert!(PROCESS_MAX_PROCESSES > 0);
    assert!(PROCESS_MAX_PROCESSES <= i32::MAX as usize);
    assert!(MAX_FILE_NAME > 0);
};
