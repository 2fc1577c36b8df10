//! Call-site attribution for log lines and error messages

use std::fmt;
use std::panic::Location;

/// Source location of the code that asked for something to be logged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Site {
    file: &'static str,
    line: u32,
}

impl Site {
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }

    /// Location of whoever called the `#[track_caller]` chain this is used in.
    ///
    /// Logger entry points are all `#[track_caller]`, so however deep the
    /// logger's own call chain gets, this resolves to the first frame
    /// outside of it.
    #[track_caller]
    pub fn caller() -> Self {
        let loc = Location::caller();
        Self::new(loc.file(), loc.line())
    }

    /// Base name of the source file, with `/` and `\` directories stripped
    pub fn file_name(&self) -> &'static str {
        base_name(self.file)
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.file_name(), self.line)
    }
}

fn base_name(path: &str) -> &str {
    let path = path.rsplit('/').next().unwrap_or(path);
    path.rsplit('\\').next().unwrap_or(path)
}
