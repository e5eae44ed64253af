//! Contract for running external helpers (`encfs`, `fusermount`, `mount`, ...).
//!
//! The controller never touches `std::process` directly; everything goes through
//! [`HelperRunner`] so the retry and classification paths can be driven by
//! scripted fakes in tests.

use async_trait::async_trait;
use std::ffi::OsString;
use std::fmt;
use zeroize::Zeroizing;

/// One helper call: program, argument list, and optional stdin payload.
#[derive(Clone)]
pub struct Invocation {
    pub program: OsString,
    pub args: Vec<OsString>,
    input: Option<Zeroizing<Vec<u8>>>,
}

impl Invocation {
    pub fn new<P, I, A>(program: P, args: I) -> Self
    where
        P: Into<OsString>,
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            input: None,
        }
    }

    /// Attach bytes that are written to stdin before stdin is closed.
    pub fn with_input(mut self, input: &[u8]) -> Self {
        self.input = Some(Zeroizing::new(input.to_vec()));
        self
    }

    pub fn input(&self) -> Option<&[u8]> {
        self.input.as_deref().map(Vec::as_slice)
    }

    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Render the command line for logs; the stdin payload is never included.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program_name()];
        parts.extend(self.args.iter().map(|arg| arg.to_string_lossy().into_owned()));
        parts.join(" ")
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("input", &self.input.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Captured streams of a helper that exited with status 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelperOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Terminal failure of a helper call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelperFailure {
    pub program: String,
    pub code: Option<i32>,
    pub signal: Option<i32>,
    /// Everything the helper wrote to stderr before terminating.
    pub stderr: String,
    /// Spawn or pipe error reported by the OS, if the failure did not come from an exit status.
    pub cause: Option<String>,
}

impl HelperFailure {
    pub fn exited(
        program: impl Into<String>,
        code: Option<i32>,
        signal: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            code,
            signal,
            stderr: stderr.into(),
            cause: None,
        }
    }

    pub fn errored(program: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self {
            program: program.into(),
            cause: Some(cause.to_string()),
            ..Self::default()
        }
    }
}

impl fmt::Display for HelperFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed", self.program)?;
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, " (exit code {code})")?,
            (None, Some(signal)) => write!(f, " (terminated by signal {signal})")?,
            (None, None) => {}
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            write!(f, ": {stderr}")?;
        }
        Ok(())
    }
}

/// Runs one helper to completion and reports exactly one outcome.
///
/// Implementations must reap the child in every path, including stdin failures.
#[async_trait]
pub trait HelperRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<HelperOutput, HelperFailure>;
}

#[async_trait]
impl<T> HelperRunner for std::sync::Arc<T>
where
    T: HelperRunner + ?Sized,
{
    async fn run(&self, invocation: &Invocation) -> Result<HelperOutput, HelperFailure> {
        (**self).run(invocation).await
    }
}
