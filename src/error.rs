use thiserror::Error;

/// Failure classes that end a run. Attached as context to the underlying
/// error so `main` can recover the process exit code from the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExitError {
    #[error("CLI: No input file given")]
    NoInput,
    #[error("CLI: Invalid command line")]
    Usage,
    #[error("CLI: Could not read input file")]
    UnreadableInput,
    #[error("Filter: Syntax error")]
    FilterSyntax,
    #[error("Output: Could not open output file")]
    OutputOpen,
    #[error("Output: Cannot write .pbf format")]
    PbfOutput,
    #[error("Pipeline: Could not use temporary file")]
    TempFile,
    #[error("Input: Unsupported input format")]
    UnsupportedFormat,
    #[error("Pipeline: Could not allocate buffer memory")]
    BufferAllocation,
    #[error("Pipeline: Not enough memory for hash tables")]
    Hash,
    #[error("Output: Write error")]
    Write,
}

impl ExitError {
    pub fn code(self) -> u8 {
        match self {
            ExitError::NoInput | ExitError::Usage | ExitError::UnreadableInput => 1,
            ExitError::FilterSyntax => 2,
            ExitError::OutputOpen | ExitError::PbfOutput => 3,
            ExitError::TempFile => 4,
            ExitError::UnsupportedFormat => 5,
            ExitError::BufferAllocation => 6,
            ExitError::Hash => 91,
            ExitError::Write => 92,
        }
    }
}

/// Exit code for an error chain; anything unclassified is a usage error.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<ExitError>()
        .copied()
        .map_or(1, ExitError::code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn exit_code_is_found_below_other_context() {
        let err = std::fs::read("/nonexistent/osmfilter/input.osm")
            .context(ExitError::UnreadableInput)
            .context("Pipeline: Failed to open input")
            .unwrap_err();
        assert_eq!(exit_code(&err), 1);

        let err = Err::<(), _>(std::io::Error::other("disk full"))
            .context(ExitError::Write)
            .unwrap_err();
        assert_eq!(exit_code(&err), 92);
    }

    #[test]
    fn unclassified_errors_map_to_one() {
        let err = anyhow::anyhow!("something odd");
        assert_eq!(exit_code(&err), 1);
    }
}
