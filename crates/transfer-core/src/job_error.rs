//! Job execution errors
//!
//! A job handler fails with a [`JobError`] when it needs to tell the queue
//! whether running it again could help.

use std::fmt;

#[derive(Debug)]
pub struct JobError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl JobError {
    /// The job fails for good, e.g. its payload no longer decodes.
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: false,
        }
    }

    /// The job is retried according to its retry budget.
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: true,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        Self::recoverable(err)
    }
}

/// Mark a result's error as not worth retrying.
pub trait JobResultExt<T> {
    fn unrecoverable(self) -> Result<T, JobError>;
}

impl<T, E: Into<anyhow::Error>> JobResultExt<T> for Result<T, E> {
    fn unrecoverable(self) -> Result<T, JobError> {
        self.map_err(|e| JobError::unrecoverable(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecoverable_error() {
        let err = JobError::unrecoverable(anyhow::anyhow!("payload missing session_token"));
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("session_token"));
    }

    #[test]
    fn test_from_anyhow_is_recoverable() {
        let err: JobError = anyhow::anyhow!("smtp timeout").into();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_result_ext_survives_anyhow_round_trip() {
        let result: Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let err = anyhow::Error::from(result.unrecoverable().unwrap_err());
        let job_err = err.downcast_ref::<JobError>().unwrap();
        assert!(!job_err.is_recoverable());
    }
}
