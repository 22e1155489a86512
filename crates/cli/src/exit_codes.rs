//! CLI Exit Code Registry
//!
//! Single source of truth for `itcmatch` exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain    | Description                              |
//! |---------|-----------|------------------------------------------|
//! | 0       | Universal | Success                                  |
//! | 2       | Universal | CLI usage error (bad args)               |
//! | 60-69   | recon     | Reconciliation codes                     |
//!
//! Usage errors are produced by clap itself and never pass through
//! `CliError`.
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// Usage error - bad arguments, missing required options.
#[allow(dead_code)]
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Recon (60-69)
// =============================================================================

/// Config could not be parsed or failed validation.
pub const EXIT_RECON_INVALID_CONFIG: u8 = 60;

/// Runtime failure: unreadable input, missing column, duplicate ids,
/// cancelled run, output write error.
pub const EXIT_RECON_RUNTIME: u8 = 61;

/// Run completed but purchase-register records remain unmatched
/// (only with `--fail-on-unmatched`).
pub const EXIT_RECON_UNMATCHED: u8 = 62;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recon_codes_are_distinct_and_in_range() {
        let codes = [EXIT_RECON_INVALID_CONFIG, EXIT_RECON_RUNTIME, EXIT_RECON_UNMATCHED];
        for (i, a) in codes.iter().enumerate() {
            assert!((60..70).contains(a));
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_ne!(EXIT_SUCCESS, EXIT_USAGE);
    }
}
